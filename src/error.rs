//! エンジンのエラー分類
//!
//! 各操作は `anyhow::Result` を返す。エラーを状態遷移に変える側は [`EngineError`] にダウンキャストする。

use thiserror::Error;

/// 権限を拒否されたデバイス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Camera,
    Location,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Camera => f.write_str("camera"),
            Resource::Location => f.write_str("location"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// それを使うサブシステムだけ止める。リトライしない。
    #[error("{resource} permission denied")]
    PermissionDenied { resource: Resource },

    /// トラッキングループは停止。通知は 1 回だけ。
    #[error("failed to load pose model: {0}")]
    ModelLoad(String),

    #[error("camera stream lost: {0}")]
    CameraLost(String),

    #[error("challenge cannot be started: {reason}")]
    NotStartable { reason: String },

    #[error("invalid transition from {from} on {action}")]
    InvalidTransition { from: &'static str, action: &'static str },

    /// 解釈できないブリッジのペイロード。ログに残して捨てる。
    #[error("malformed bridge payload: {0}")]
    Decode(String),
}

impl EngineError {
    /// 発生元のサブシステムを止めるエラーか
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::PermissionDenied { .. }
                | EngineError::ModelLoad(_)
                | EngineError::CameraLost(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_message() {
        let err = EngineError::PermissionDenied { resource: Resource::Camera };
        assert_eq!(err.to_string(), "camera permission denied");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::ModelLoad("missing".into()).is_fatal());
        assert!(EngineError::PermissionDenied { resource: Resource::Location }.is_fatal());
        assert!(!EngineError::Decode("oops".into()).is_fatal());
        assert!(!EngineError::NotStartable { reason: "far".into() }.is_fatal());
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = EngineError::CameraLost("unplugged".into()).into();
        let engine = err.downcast_ref::<EngineError>();
        assert!(matches!(engine, Some(EngineError::CameraLost(_))));
    }
}
