use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use group_motion::bridge::BRIDGE_SHIM;
use group_motion::challenge::{
    Challenge, ChallengeRunner, ChallengeSession, ChallengeState, Observation, Pipeline,
    SessionPolicy, Update,
};
use group_motion::config::Config;
use group_motion::error::{EngineError, Resource};
use group_motion::geo::GeoPoint;
use group_motion::reward::DemoMinter;

const CONFIG_PATH: &str = "config.toml";

fn print_help() {
    println!("コマンド:");
    println!("  loc <lat> <lon>  - 現在地を設定 (例: loc 51.5074 -0.0878)");
    println!("  deny             - 位置情報の権限を拒否");
    println!("  start            - チャレンジ開始");
    println!("  stop             - 実行中のチャレンジを中断");
    println!("  msg <json>       - トラッキング画面からのメッセージを送る");
    println!("  url              - トラッキング画面の URL");
    println!("  pose             - 別のターゲットポーズ (ローカル推論のみ)");
    println!("  status           - 現在の状態");
    println!("  q                - 終了");
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load_or_default(CONFIG_PATH);
    let mut challenge = Challenge::london_bridge_pushups();
    challenge.unlock_radius_km = config.geo.unlock_radius_km;

    println!("=== Group Motion ({}) ===", env!("GROUP_MOTION_VERSION"));
    println!("{}: {}", challenge.title, challenge.description);
    println!(
        "場所: {} ({:.4}, {:.4}) / 半径 {} km",
        challenge.location_name,
        challenge.location.latitude,
        challenge.location.longitude,
        challenge.unlock_radius_km
    );
    println!("推論: {:?}", config.session.mode);
    println!();
    print_help();
    println!();

    let pipeline = Pipeline::from_config(&config)?;
    let session = ChallengeSession::new(challenge, SessionPolicy::from_config(&config));
    let mut runner = ChallengeRunner::new(session, pipeline, Box::new(DemoMinter));
    let mut rng = rand::thread_rng();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            update = runner.next_update(), if runner.is_listening() => {
                if let Some(update) = update {
                    report(&runner, &update);
                }
                continue;
            }
        };
        let Some(line) = line else { break };
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "loc" if parts.len() == 3 => {
                let (Ok(lat), Ok(lon)) = (parts[1].parse::<f64>(), parts[2].parse::<f64>()) else {
                    println!("緯度・経度は数値で指定してください");
                    continue;
                };
                let change = runner.update_location(Ok(GeoPoint::new(lat, lon)));
                if let Some(d) = runner.session().current_distance_km() {
                    println!("距離: {:.3} km", d);
                }
                if let Some(change) = change {
                    println!("状態: {} -> {}", change.from, change.to);
                }
            }
            "deny" => {
                runner.update_location(Err(EngineError::PermissionDenied {
                    resource: Resource::Location,
                }));
                println!("位置情報なし: チャレンジは開始できません");
            }
            "start" => match runner.start() {
                Ok(change) => println!("状態: {} -> {}", change.from, change.to),
                Err(e) => println!("開始できません: {:#}", e),
            },
            "stop" => match runner.abandon() {
                Some(change) => println!("状態: {} -> {}", change.from, change.to),
                None => println!("実行中のチャレンジはありません"),
            },
            "msg" if parts.len() > 1 => {
                let payload = line.trim_start()["msg".len()..].trim().to_string();
                if !runner.push_bridge_payload(payload) {
                    println!("ブリッジは動いていません");
                }
            }
            "url" => match config.bridge.tracking_url() {
                Ok(url) => {
                    println!("{}", url);
                    log::debug!("shim:{}", BRIDGE_SHIM);
                }
                Err(e) => println!("{:#}", e),
            },
            "pose" => match runner.new_pose(&mut rng) {
                Some(target) => println!("ターゲット: {}", target.name),
                None => println!("ブリッジモードでは使えません"),
            },
            "status" => print_status(&runner),
            "q" => {
                println!("終了します");
                break;
            }
            _ => print_help(),
        }
    }

    if !config.session.keep_progress_on_exit && runner.state() == ChallengeState::Active {
        log::info!("leaving an active challenge, progress is discarded");
    }
    runner.shutdown().await;
    Ok(())
}

fn report(runner: &ChallengeRunner, update: &Update) {
    match &update.observation {
        Observation::Verdict(verdict) => log::debug!("score {} matched {}", verdict.score, verdict.matched),
        Observation::NoPerson => log::debug!("no person in frame"),
        Observation::Bridge(msg) => {
            log::debug!("bridge: {:?}", msg);
            if let Some(state) = runner.bridge_state() {
                println!("\n{} / reps {}", state.placement_hint(), state.rep_count);
            }
        }
        Observation::FallbackElapsed => println!("\n完了の通知がないまま時間切れ: 完了扱いにします"),
        Observation::TrackingFailed(reason) => println!("\nトラッキング停止: {}", reason),
    }

    if let Some(change) = update.change {
        println!("\n状態: {} -> {}", change.from, change.to);
    }
    if runner.state() == ChallengeState::Completed {
        if let Some(receipt) = runner.receipt() {
            println!(
                "{} を獲得しました: {} ({})",
                receipt.reward_name, receipt.address, receipt.completed_at
            );
        }
    }
}

fn print_status(runner: &ChallengeRunner) {
    let session = runner.session();
    println!("状態: {}", session.state());
    match session.current_distance_km() {
        Some(d) => println!("距離: {:.3} km (開始{})", d, if session.can_start() { "可" } else { "不可" }),
        None => println!("距離: 不明"),
    }
    println!("レップ: {} / {}", session.rep_count(), session.challenge().rep_target);
    if let Some(target) = runner.target_pose() {
        println!("ターゲット: {}", target.name);
    }
    if let Some(state) = runner.bridge_state() {
        println!("ガイド: {}", state.placement_hint());
    }
    if let Some(verdict) = session.last_verdict() {
        println!("直近の判定: {:?}", verdict);
    }
    if let Some(err) = runner.last_error() {
        println!("エラー: {}", err);
    }
}
