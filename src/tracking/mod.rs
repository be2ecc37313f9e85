//! トラッキングループ: カメラ → 姿勢推定 → ポーズ判定
//!
//! キャプチャスレッドは毎フレーム [`LatestFrameSlot`] に書き込む。tokio タスクは設定したレートで
//! 最新フレームを取り出し、blocking プールで推定して判定する。推論の完了を待ってから次を取るので、
//! 推論は常に高々 1 つ。待っている間に届いたフレームはスロットで上書きされて捨てられる。

pub mod slot;
pub mod stats;

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::camera::{CaptureThread, FramePool, FrameSource};
use crate::config::TrackingConfig;
use crate::error::EngineError;
use crate::pose::{MatchVerdict, Pose, PoseEstimator, PoseMatcher, TargetPose};

pub use slot::LatestFrameSlot;
pub use stats::{StatsSnapshot, TrackingStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopState::Idle => "Idle",
            LoopState::Running => "Running",
            LoopState::Stopped => "Stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrackingEvent {
    Verdict {
        frame_id: u64,
        verdict: MatchVerdict,
        at: Instant,
    },
    NoPerson {
        frame_id: u64,
        at: Instant,
    },
    /// ループが自分で止まった (カメラ喪失、権限の取り消し、推定の失敗)
    Failed(String),
}

type SharedEstimator = Arc<Mutex<Box<dyn PoseEstimator>>>;

/// 1 回の実行が持つもの
struct RunContext {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    capture: CaptureThread,
}

pub struct TrackingLoop {
    estimator: SharedEstimator,
    matcher: PoseMatcher,
    target: Arc<RwLock<TargetPose>>,
    frame_period: Duration,
    pool: FramePool,
    stats: Arc<TrackingStats>,
    pose_tx: watch::Sender<Option<Pose>>,
    state: LoopState,
    run: Option<RunContext>,
}

impl TrackingLoop {
    /// 推定器は初期化済みであること。読み込みに失敗したモデルはここまで来ない。
    pub fn new(
        estimator: Box<dyn PoseEstimator>,
        matcher: PoseMatcher,
        target: TargetPose,
        config: &TrackingConfig,
    ) -> Self {
        let fps = config.target_fps.max(1);
        let (pose_tx, _) = watch::channel(None);
        Self {
            estimator: Arc::new(Mutex::new(estimator)),
            matcher,
            target: Arc::new(RwLock::new(target)),
            frame_period: Duration::from_secs_f64(1.0 / fps as f64),
            pool: FramePool::new(config.frame_buffers),
            stats: Arc::new(TrackingStats::new()),
            pose_tx,
            state: LoopState::Idle,
            run: None,
        }
    }

    pub fn state(&self) -> LoopState {
        match (&self.run, self.state) {
            (Some(run), LoopState::Running) if run.cancel.is_cancelled() => LoopState::Stopped,
            _ => self.state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// 開いたばかりのフレームソースでトラッキングを始める。tokio ランタイム内で呼ぶこと。
    ///
    /// `Idle` からと、再スタートとして `Stopped` から呼べる。
    pub fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        events: mpsc::UnboundedSender<TrackingEvent>,
    ) -> Result<()> {
        if self.is_running() {
            return Err(EngineError::InvalidTransition {
                from: LoopState::Running.as_str(),
                action: "start",
            }
            .into());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("tracking loop needs a tokio runtime: {}", e))?;

        // 前回の実行が残っていればカメラを解放してから始める
        self.release_camera();

        let cancel = CancellationToken::new();
        let slot = Arc::new(LatestFrameSlot::new());

        let capture = {
            let slot = Arc::clone(&slot);
            let stats = Arc::clone(&self.stats);
            let events = events.clone();
            let cancel = cancel.clone();
            CaptureThread::start(
                source,
                self.pool.clone(),
                cancel.clone(),
                Box::new(move |frame| match frame {
                    Ok(frame) => {
                        let displaced = slot.put(frame);
                        stats.record_capture(displaced);
                    }
                    Err(e) => {
                        let _ = events.send(TrackingEvent::Failed(format!("{:#}", e)));
                        cancel.cancel();
                    }
                }),
            )?
        };

        let worker = Worker {
            estimator: Arc::clone(&self.estimator),
            matcher: self.matcher.clone(),
            target: Arc::clone(&self.target),
            slot,
            stats: Arc::clone(&self.stats),
            pose_tx: self.pose_tx.clone(),
            events,
            cancel: cancel.clone(),
            frame_period: self.frame_period,
        };
        let task = runtime.spawn(worker.run());

        log::info!("tracking started ({:?} per tick)", self.frame_period);
        self.run = Some(RunContext {
            cancel,
            task,
            capture,
        });
        self.state = LoopState::Running;
        Ok(())
    }

    /// 停止する。次の tick より前に効く。何度呼んでもよい。
    pub fn stop(&mut self) {
        if let Some(run) = &self.run {
            if !run.cancel.is_cancelled() {
                log::info!("tracking stopped");
            }
            run.cancel.cancel();
            run.capture.stop();
        }
        if self.state == LoopState::Running {
            self.state = LoopState::Stopped;
        }
    }

    /// 停止してキャプチャスレッドの終了を待つ。カメラを開き直す前に呼ぶ。
    ///
    /// ブロッキング。待つのは高々 1 フレームの読み込み分。推論中のタスクは待たない。
    pub fn release_camera(&mut self) {
        self.stop();
        if let Some(run) = self.run.take() {
            run.capture.join();
        }
    }

    /// 停止して、ループタスクとキャプチャスレッドの終了を待つ。
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(run) = self.run.take() {
            if let Err(e) = run.task.await {
                log::error!("tracking task ended abnormally: {}", e);
            }
            let capture = run.capture;
            if tokio::task::spawn_blocking(move || capture.join()).await.is_err() {
                log::error!("failed to join capture thread");
            }
        }
    }

    /// 「別のポーズ」。次に判定するフレームから反映。
    pub fn set_target(&self, target: TargetPose) {
        let mut guard = self.target.write().unwrap_or_else(|p| p.into_inner());
        log::info!("target pose: {} -> {}", guard.name, target.name);
        *guard = target;
    }

    pub fn target(&self) -> TargetPose {
        self.target.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// 表示中の最新ポーズ。誰も検出されていなければ `None`。
    pub fn subscribe_pose(&self) -> watch::Receiver<Option<Pose>> {
        self.pose_tx.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn frame_pool(&self) -> &FramePool {
        &self.pool
    }
}

impl Drop for TrackingLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    estimator: SharedEstimator,
    matcher: PoseMatcher,
    target: Arc<RwLock<TargetPose>>,
    slot: Arc<LatestFrameSlot>,
    stats: Arc<TrackingStats>,
    pose_tx: watch::Sender<Option<Pose>>,
    events: mpsc::UnboundedSender<TrackingEvent>,
    cancel: CancellationToken,
    frame_period: Duration,
}

impl Worker {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.frame_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(frame) = self.slot.take() else {
                continue;
            };
            let frame_id = frame.id;

            let joined = {
                let estimator = Arc::clone(&self.estimator);
                let stats = Arc::clone(&self.stats);
                tokio::task::spawn_blocking(move || {
                    let outcome = match estimator.lock() {
                        Ok(mut estimator) => {
                            // ロック待ちは推論中に数えない
                            let _in_flight = stats.begin_inference();
                            estimator.estimate(&frame)
                        }
                        Err(_) => Err(anyhow!("pose estimator poisoned by an earlier panic")),
                    };
                    (frame, outcome)
                })
                .await
            };

            let (frame, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    let _ = self.events.send(TrackingEvent::Failed(format!("inference worker: {}", e)));
                    self.cancel.cancel();
                    break;
                }
            };

            // 推論中に停止された: 結果は反映しない
            if self.cancel.is_cancelled() {
                self.stats.record_stale();
                log::debug!("discarding result for frame {} after stop", frame_id);
                frame.release();
                break;
            }

            let at = Instant::now();
            let event = match outcome {
                Ok(Some(pose)) => {
                    let verdict = {
                        let target = self.target.read().unwrap_or_else(|p| p.into_inner());
                        self.matcher.score(&pose, &target)
                    };
                    self.pose_tx.send_replace(Some(pose));
                    TrackingEvent::Verdict { frame_id, verdict, at }
                }
                Ok(None) => {
                    self.pose_tx.send_replace(None);
                    TrackingEvent::NoPerson { frame_id, at }
                }
                Err(e) => {
                    let fatal = e
                        .downcast_ref::<EngineError>()
                        .map(EngineError::is_fatal)
                        .unwrap_or(false);
                    frame.release();
                    if fatal {
                        log::error!("tracking aborted: {:#}", e);
                        let _ = self.events.send(TrackingEvent::Failed(format!("{:#}", e)));
                        self.cancel.cancel();
                        break;
                    }
                    log::warn!("inference failed on frame {}: {:#}", frame_id, e);
                    continue;
                }
            };
            frame.release();

            if self.events.send(event).is_err() {
                log::debug!("event receiver gone, stopping tracking");
                self.cancel.cancel();
                break;
            }
        }

        self.slot.clear();
    }
}
