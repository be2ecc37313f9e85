//! カメラ映像に対するポーズ判定だけを行う (チャレンジなし)。
//!
//! 判定したフレームごとに 1 行出力する。Ctrl-C で終了。

use anyhow::Result;
use tokio::sync::mpsc;

use group_motion::camera::OpenCvCamera;
use group_motion::config::Config;
use group_motion::pose::{OnnxPoseDetector, PoseMatcher, TargetPoseLibrary};
use group_motion::tracking::{TrackingEvent, TrackingLoop};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Pose Tracker ({})", env!("GROUP_MOTION_VERSION"));

    let config = Config::load_or_default(CONFIG_PATH);
    let mut poses = TargetPoseLibrary::with_builtin(config.target_poses.iter().cloned());
    if let Some(name) = std::env::args().nth(1) {
        if poses.select(&name).is_none() {
            anyhow::bail!("unknown target pose {:?}", name);
        }
    }

    let detector = OnnxPoseDetector::new(&config.model.path, config.tracking.min_pose_confidence)?;
    let camera = OpenCvCamera::open(config.camera.index, config.camera.width, config.camera.height)?;
    let mut tracking = TrackingLoop::new(
        Box::new(detector),
        PoseMatcher::from_config(&config.matcher),
        poses.current().clone(),
        &config.tracking,
    );
    log::info!("target pose: {}", poses.current().name);

    let (tx, mut rx) = mpsc::unbounded_channel();
    tracking.start(Box::new(camera), tx)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted");
                break;
            }
            event = rx.recv() => match event {
                Some(TrackingEvent::Verdict { frame_id, verdict, .. }) => {
                    println!(
                        "frame {:>6}: {}/{} keypoints {}",
                        frame_id,
                        verdict.score,
                        tracking.target().keypoints.len(),
                        if verdict.matched { "MATCH" } else { "-" }
                    );
                }
                Some(TrackingEvent::NoPerson { frame_id, .. }) => {
                    println!("frame {:>6}: no person", frame_id);
                }
                Some(TrackingEvent::Failed(reason)) => {
                    log::error!("{}", reason);
                    break;
                }
                None => break,
            }
        }
    }

    tracking.shutdown().await;
    let stats = tracking.stats();
    log::info!(
        "captured {} / dropped {} / inferences {} / stale {}",
        stats.frames_captured,
        stats.frames_dropped,
        stats.inferences,
        stats.stale_results
    );
    Ok(())
}
