//! チャレンジの状態遷移 `Locked → Unlockable → Active → Completed`
//!
//! [`ChallengeSession`] は純粋な状態機械。[`ChallengeRunner`] が判定用のトラッカーを持ち、
//! セッションの状態に合わせて動かす。

pub mod model;
pub mod runner;
pub mod session;

pub use model::{Challenge, ChallengeState, CompletionReason, LastVerdict, StateChange};
pub use runner::{CameraOpener, ChallengeRunner, Observation, Pipeline, Update};
pub use session::{ChallengeSession, SessionPolicy};
