use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;

use super::model::{ChallengeState, StateChange};
use super::session::ChallengeSession;
use crate::bridge::{BridgeEvent, BridgeMessage, BridgeSession, BridgeState};
use crate::camera::FrameSource;
use crate::config::{BridgeConfig, Config, InferenceMode};
use crate::error::EngineError;
use crate::geo::GeoPoint;
use crate::pose::{MatchVerdict, TargetPose, TargetPoseLibrary};
use crate::reward::{RewardMinter, RewardReceipt};
use crate::tracking::{TrackingEvent, TrackingLoop};

/// チャレンジ開始時にカメラを開く。開始ごとに 1 回呼ばれる。
pub type CameraOpener = Box<dyn FnMut() -> Result<Box<dyn FrameSource>> + Send>;

/// 判定に使うトラッカー
pub enum Pipeline {
    Local {
        tracking: TrackingLoop,
        open_camera: CameraOpener,
        poses: TargetPoseLibrary,
    },
    Bridge {
        bridge: BridgeSession,
    },
}

impl Pipeline {
    pub fn local(tracking: TrackingLoop, open_camera: CameraOpener, poses: TargetPoseLibrary) -> Self {
        tracking.set_target(poses.current().clone());
        Pipeline::Local {
            tracking,
            open_camera,
            poses,
        }
    }

    pub fn bridge(config: &BridgeConfig) -> Self {
        Pipeline::Bridge {
            bridge: BridgeSession::new(config),
        }
    }

    /// `[session] mode` で選ばれたトラッカーを組み立てる
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.session.mode {
            InferenceMode::Bridge => Ok(Self::bridge(&config.bridge)),
            InferenceMode::Local => Self::local_from_config(config),
        }
    }

    #[cfg(feature = "desktop")]
    fn local_from_config(config: &Config) -> Result<Self> {
        use crate::camera::OpenCvCamera;
        use crate::pose::{OnnxPoseDetector, PoseMatcher};

        let detector = OnnxPoseDetector::new(&config.model.path, config.tracking.min_pose_confidence)?;
        let poses = TargetPoseLibrary::with_builtin(config.target_poses.iter().cloned());
        let tracking = TrackingLoop::new(
            Box::new(detector),
            PoseMatcher::from_config(&config.matcher),
            poses.current().clone(),
            &config.tracking,
        );
        let camera = config.camera.clone();
        let open_camera: CameraOpener = Box::new(move || {
            let source = OpenCvCamera::open(camera.index, camera.width, camera.height)?;
            Ok(Box::new(source) as Box<dyn FrameSource>)
        });
        Ok(Self::local(tracking, open_camera, poses))
    }

    #[cfg(not(feature = "desktop"))]
    fn local_from_config(_config: &Config) -> Result<Self> {
        anyhow::bail!("local inference needs the `desktop` feature (camera + ONNX Runtime)")
    }

    pub fn mode(&self) -> InferenceMode {
        match self {
            Pipeline::Local { .. } => InferenceMode::Local,
            Pipeline::Bridge { .. } => InferenceMode::Bridge,
        }
    }

    fn is_running(&self) -> bool {
        match self {
            Pipeline::Local { tracking, .. } => tracking.is_running(),
            Pipeline::Bridge { bridge } => bridge.is_running(),
        }
    }

    fn stop(&mut self) {
        match self {
            Pipeline::Local { tracking, .. } => tracking.stop(),
            Pipeline::Bridge { bridge } => bridge.stop(),
        }
    }

    async fn shutdown(&mut self) {
        match self {
            Pipeline::Local { tracking, .. } => tracking.shutdown().await,
            Pipeline::Bridge { bridge } => bridge.shutdown().await,
        }
    }
}

/// 受け取ったイベントと、それによって起きた状態遷移
#[derive(Debug, Clone)]
pub struct Update {
    pub observation: Observation,
    pub change: Option<StateChange>,
}

#[derive(Debug, Clone)]
pub enum Observation {
    Verdict(MatchVerdict),
    NoPerson,
    Bridge(BridgeMessage),
    FallbackElapsed,
    TrackingFailed(String),
}

enum Inbound {
    Tracking(TrackingEvent),
    Bridge(BridgeEvent),
}

enum Closed {
    Tracking,
    Bridge,
}

/// 1 つのチャレンジを進める。位置情報とトラッカーのイベントをセッションに渡し、
/// `Active` の間だけトラッカーをちょうど 1 つ動かす。
pub struct ChallengeRunner {
    session: ChallengeSession,
    pipeline: Pipeline,
    minter: Box<dyn RewardMinter>,
    receipt: Option<RewardReceipt>,
    last_error: Option<String>,
    tracking_rx: Option<mpsc::UnboundedReceiver<TrackingEvent>>,
    bridge_rx: Option<mpsc::UnboundedReceiver<BridgeEvent>>,
    bridge_host: Option<mpsc::UnboundedSender<String>>,
}

impl ChallengeRunner {
    pub fn new(session: ChallengeSession, pipeline: Pipeline, minter: Box<dyn RewardMinter>) -> Self {
        Self {
            session,
            pipeline,
            minter,
            receipt: None,
            last_error: None,
            tracking_rx: None,
            bridge_rx: None,
            bridge_host: None,
        }
    }

    pub fn session(&self) -> &ChallengeSession {
        &self.session
    }

    pub fn state(&self) -> ChallengeState {
        self.session.state()
    }

    pub fn mode(&self) -> InferenceMode {
        self.pipeline.mode()
    }

    pub fn receipt(&self) -> Option<&RewardReceipt> {
        self.receipt.as_ref()
    }

    /// ユーザーに見せる直近のエラー
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_tracker_running(&self) -> bool {
        self.pipeline.is_running()
    }

    /// まだイベントが届きうるか
    pub fn is_listening(&self) -> bool {
        self.tracking_rx.is_some() || self.bridge_rx.is_some()
    }

    pub fn target_pose(&self) -> Option<TargetPose> {
        match &self.pipeline {
            Pipeline::Local { tracking, .. } => Some(tracking.target()),
            Pipeline::Bridge { .. } => None,
        }
    }

    pub fn bridge_state(&self) -> Option<BridgeState> {
        match &self.pipeline {
            Pipeline::Bridge { bridge } => Some(bridge.state()),
            Pipeline::Local { .. } => None,
        }
    }

    /// 位置情報を 1 件渡す。取得失敗なら距離は不明のまま。
    pub fn update_location(&mut self, reading: Result<GeoPoint, EngineError>) -> Option<StateChange> {
        let point = match reading {
            Ok(point) => Some(point),
            Err(e) => {
                log::warn!("location unavailable: {}", e);
                self.last_error = Some(e.to_string());
                None
            }
        };
        let change = self.session.update_location(point);
        if let Some(change) = change {
            self.on_change(change);
        }
        change
    }

    /// ユーザーの「開始」。セッションが許さなければ何も起動しない。
    pub fn start(&mut self) -> Result<StateChange> {
        self.session.check_startable()?;

        if let Err(e) = self.start_pipeline() {
            log::error!("could not start {:?} tracking: {:#}", self.mode(), e);
            self.last_error = Some(format!("{:#}", e));
            self.halt();
            return Err(e);
        }
        self.last_error = None;

        match self.session.start() {
            Ok(change) => Ok(change),
            Err(e) => {
                self.halt();
                Err(e.into())
            }
        }
    }

    fn start_pipeline(&mut self) -> Result<()> {
        match &mut self.pipeline {
            Pipeline::Local {
                tracking,
                open_camera,
                ..
            } => {
                // 前回のキャプチャがデバイスを手放すまで待つ
                tracking.release_camera();
                let source = open_camera()?;
                let (tx, rx) = mpsc::unbounded_channel();
                tracking.start(source, tx)?;
                self.tracking_rx = Some(rx);
            }
            Pipeline::Bridge { bridge } => {
                let (tx, rx) = mpsc::unbounded_channel();
                let host = bridge.start(tx)?;
                self.bridge_host = Some(host);
                self.bridge_rx = Some(rx);
            }
        }
        Ok(())
    }

    /// 画面からの生ペイロードをブリッジへ渡す。受信中のブリッジがなければ false。
    pub fn push_bridge_payload(&self, payload: impl Into<String>) -> bool {
        match &self.bridge_host {
            Some(host) => host.send(payload.into()).is_ok(),
            None => false,
        }
    }

    /// チャレンジ画面に留まったまま、実行中の挑戦をやめる。
    pub fn abandon(&mut self) -> Option<StateChange> {
        let change = self.session.abandon();
        if let Some(change) = change {
            self.on_change(change);
        }
        change
    }

    /// 「別のポーズ」。ローカル推論のときだけ意味がある。
    pub fn new_pose<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<TargetPose> {
        let Pipeline::Local { tracking, poses, .. } = &mut self.pipeline else {
            return None;
        };
        let next = poses.next_random(rng).clone();
        tracking.set_target(next.clone());
        self.session.reset_match_streak();
        Some(next)
    }

    /// 次のイベントを待って反映する。何も受信していなければ `None`。
    pub async fn next_update(&mut self) -> Option<Update> {
        loop {
            let tracking_open = self.tracking_rx.is_some();
            let bridge_open = self.bridge_rx.is_some();

            let inbound = tokio::select! {
                ev = recv_from(&mut self.tracking_rx), if tracking_open => {
                    ev.map(Inbound::Tracking).ok_or(Closed::Tracking)
                }
                ev = recv_from(&mut self.bridge_rx), if bridge_open => {
                    ev.map(Inbound::Bridge).ok_or(Closed::Bridge)
                }
                else => return None,
            };

            match inbound {
                Ok(inbound) => return Some(self.handle(inbound)),
                Err(Closed::Tracking) => self.tracking_rx = None,
                Err(Closed::Bridge) => self.bridge_rx = None,
            }
        }
    }

    fn handle(&mut self, inbound: Inbound) -> Update {
        let (observation, change) = match inbound {
            Inbound::Tracking(TrackingEvent::Verdict { verdict, at, .. }) => {
                (Observation::Verdict(verdict), self.session.apply_verdict(verdict, at))
            }
            Inbound::Tracking(TrackingEvent::NoPerson { .. }) => {
                self.session.apply_no_person();
                (Observation::NoPerson, None)
            }
            Inbound::Tracking(TrackingEvent::Failed(reason)) => {
                log::error!("tracking failed: {}", reason);
                self.last_error = Some(reason.clone());
                (Observation::TrackingFailed(reason), self.session.tracking_failed())
            }
            Inbound::Bridge(BridgeEvent::Message(msg)) => {
                let change = self.session.apply_bridge(&msg);
                (Observation::Bridge(msg), change)
            }
            Inbound::Bridge(BridgeEvent::FallbackElapsed) => {
                (Observation::FallbackElapsed, self.session.apply_fallback())
            }
        };
        if let Some(change) = change {
            self.on_change(change);
        }
        Update {
            observation,
            change,
        }
    }

    fn on_change(&mut self, change: StateChange) {
        if change.from == ChallengeState::Active && change.to != ChallengeState::Active {
            self.halt();
        }
        if change.to == ChallengeState::Completed {
            self.mint_reward();
        }
    }

    fn mint_reward(&mut self) {
        if self.receipt.is_some() {
            return;
        }
        let challenge = self.session.challenge();
        match self.minter.mint(&challenge.title, &challenge.reward_name) {
            Ok(address) => {
                self.receipt = Some(RewardReceipt {
                    reward_name: challenge.reward_name.clone(),
                    address,
                    completed_at: Utc::now(),
                });
            }
            Err(e) => {
                log::error!("reward minting failed: {:#}", e);
                self.last_error = Some(format!("reward minting failed: {:#}", e));
            }
        }
    }

    /// トラッカーを止めてチャネルを捨てる。届く途中のイベントは破棄。
    fn halt(&mut self) {
        self.pipeline.stop();
        self.tracking_rx = None;
        self.bridge_rx = None;
        self.bridge_host = None;
    }

    /// チャレンジを離れる。トラッカーを止め、タスクの終了を待つ。
    pub async fn shutdown(&mut self) {
        self.halt();
        self.pipeline.shutdown().await;
    }
}

async fn recv_from<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
