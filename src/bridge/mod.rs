//! 外部ホストのトラッキング画面を埋め込んで判定を任せる。
//!
//! 画面は [`BridgeSession::start`] が返すホストチャネルへ JSON 文字列を送ってくる。
//! ペイロードは [`BridgeMessage`] にデコードして [`BridgeState`] に反映し、[`BridgeEvent`] として流す。
//! デコードできないものはログに残して捨てる。

pub mod embed;
pub mod message;
pub mod state;

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::error::EngineError;

pub use embed::BRIDGE_SHIM;
pub use message::BridgeMessage;
pub use state::BridgeState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Message(BridgeMessage),
    /// 完了の通知がないままフォールバックの時間が過ぎた
    FallbackElapsed,
}

struct RunContext {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct BridgeSession {
    fallback: Option<Duration>,
    state: Arc<Mutex<BridgeState>>,
    decode_failures: Arc<AtomicU64>,
    run: Option<RunContext>,
}

impl BridgeSession {
    pub fn new(config: &BridgeConfig) -> Self {
        let fallback = config
            .fallback_enabled
            .then(|| Duration::from_secs(config.fallback_timeout_secs));
        Self {
            fallback,
            state: Arc::new(Mutex::new(BridgeState::new())),
            decode_failures: Arc::new(AtomicU64::new(0)),
            run: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .map(|run| !run.cancel.is_cancelled() && !run.task.is_finished())
            .unwrap_or(false)
    }

    /// 受信を始める。画面が書き込むチャネルのホスト側を返す。
    pub fn start(
        &mut self,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Result<mpsc::UnboundedSender<String>> {
        if self.is_running() {
            return Err(EngineError::InvalidTransition {
                from: "Running",
                action: "start bridge",
            }
            .into());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("bridge session needs a tokio runtime: {}", e))?;
        self.stop();

        // 前回のセッションの値は持ち越さない
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = BridgeState::new();

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let listener = Listener {
            inbound: inbound_rx,
            events,
            state: Arc::clone(&self.state),
            decode_failures: Arc::clone(&self.decode_failures),
            cancel: cancel.clone(),
            fallback: self.fallback,
        };
        let task = runtime.spawn(listener.run());
        log::info!(
            "bridge session started (fallback: {})",
            self.fallback
                .map(|d| format!("{}s", d.as_secs()))
                .unwrap_or_else(|| "off".to_string())
        );

        self.run = Some(RunContext { cancel, task });
        Ok(inbound_tx)
    }

    /// 受信をやめる。以降のペイロードは無視。何度呼んでもよい。
    pub fn stop(&mut self) {
        if let Some(run) = &self.run {
            run.cancel.cancel();
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(run) = self.run.take() {
            if let Err(e) = run.task.await {
                log::error!("bridge task ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Listener {
    inbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    state: Arc<Mutex<BridgeState>>,
    decode_failures: Arc<AtomicU64>,
    cancel: CancellationToken,
    fallback: Option<Duration>,
}

impl Listener {
    async fn run(mut self) {
        let fallback = self.fallback;
        let timeout = async move {
            match fallback {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);
        let mut fallback_fired = false;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                payload = self.inbound.recv() => {
                    let Some(payload) = payload else {
                        log::debug!("bridge channel closed by host");
                        break;
                    };
                    self.handle(&payload);
                }
                _ = &mut timeout, if !fallback_fired => {
                    fallback_fired = true;
                    log::warn!("bridge fallback timeout elapsed, assuming completion");
                    let _ = self.events.send(BridgeEvent::FallbackElapsed);
                }
            }
        }
    }

    fn handle(&mut self, payload: &str) {
        let msg = match BridgeMessage::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("dropping bridge payload: {}", e);
                log::debug!("payload was: {:?}", payload);
                return;
            }
        };
        log::debug!("bridge message: {:?}", msg);
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .apply(&msg);
        let _ = self.events.send(BridgeEvent::Message(msg));
    }
}
