use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// レップ数の更新を表す `type` の値
pub const COUNTER_TAG: &str = "counter";

/// 埋め込みのトラッキング画面から届くメッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BridgeMessage {
    /// 立ち位置と準備状態。未知の `type` もここに来るので、`kind` に生のタグを残す。
    ///
    /// `ready` は省略されうる。明示的な `false` だけが「まだ位置合わせ中」。
    PoseTrackerStatus {
        kind: Option<String>,
        ready: Option<bool>,
        posture_direction: Option<String>,
    },
    RepCounter { current_count: u32 },
}

/// 受信した JSON の形。どんなオブジェクトでも中身を見られるよう全部 Option
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    current_count: Option<i64>,
    ready: Option<bool>,
    #[serde(rename = "postureDirection")]
    posture_direction: Option<String>,
}

impl BridgeMessage {
    /// ホストチャネルのペイロードを 1 つデコードする。
    ///
    /// 注入スクリプトは JSON 文字列をさらに stringify することがあるので、
    /// 文字列にパースされたらもう一度パースする。
    pub fn decode(payload: &str) -> Result<Self, EngineError> {
        let value: Value = serde_json::from_str(payload.trim())
            .map_err(|e| EngineError::Decode(format!("invalid JSON: {}", e)))?;
        let value = match value {
            Value::String(inner) => serde_json::from_str(&inner)
                .map_err(|e| EngineError::Decode(format!("invalid nested JSON: {}", e)))?,
            other => other,
        };
        if !value.is_object() {
            return Err(EngineError::Decode(format!("expected an object, got {}", value)));
        }
        let raw: RawMessage = serde_json::from_value(value)
            .map_err(|e| EngineError::Decode(format!("unexpected field types: {}", e)))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawMessage) -> Result<Self, EngineError> {
        match raw.kind.as_deref() {
            Some(COUNTER_TAG) => {
                let count = raw
                    .current_count
                    .ok_or_else(|| EngineError::Decode("counter without current_count".into()))?;
                let current_count = u32::try_from(count)
                    .map_err(|_| EngineError::Decode(format!("rep count out of range: {}", count)))?;
                Ok(BridgeMessage::RepCounter { current_count })
            }
            _ => Ok(BridgeMessage::PoseTrackerStatus {
                kind: raw.kind,
                ready: raw.ready,
                posture_direction: raw.posture_direction,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_message() {
        let msg = BridgeMessage::decode(r#"{"type":"counter","current_count":7}"#).unwrap();
        assert_eq!(msg, BridgeMessage::RepCounter { current_count: 7 });
    }

    #[test]
    fn test_status_message() {
        let msg =
            BridgeMessage::decode(r#"{"type":"posture","ready":false,"postureDirection":"left"}"#)
                .unwrap();
        assert_eq!(
            msg,
            BridgeMessage::PoseTrackerStatus {
                kind: Some("posture".into()),
                ready: Some(false),
                posture_direction: Some("left".into()),
            }
        );
    }

    #[test]
    fn test_unknown_type_goes_to_status() {
        let msg = BridgeMessage::decode(r#"{"type":"initialization","ready":true,"extra":1}"#).unwrap();
        assert!(matches!(
            msg,
            BridgeMessage::PoseTrackerStatus { ready: Some(true), ref kind, .. } if kind.as_deref() == Some("initialization")
        ));

        let msg = BridgeMessage::decode(r#"{}"#).unwrap();
        assert_eq!(
            msg,
            BridgeMessage::PoseTrackerStatus { kind: None, ready: None, posture_direction: None }
        );
    }

    #[test]
    fn test_missing_ready_is_kept_absent() {
        let msg = BridgeMessage::decode(r#"{"type":"initialization"}"#).unwrap();
        assert_eq!(
            msg,
            BridgeMessage::PoseTrackerStatus {
                kind: Some("initialization".into()),
                ready: None,
                posture_direction: None,
            }
        );
    }

    #[test]
    fn test_double_encoded_payload() {
        let inner = r#"{"type":"counter","current_count":3}"#;
        let payload = serde_json::to_string(inner).unwrap();
        assert_eq!(
            BridgeMessage::decode(&payload).unwrap(),
            BridgeMessage::RepCounter { current_count: 3 }
        );
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        for payload in [
            "",
            "{not json",
            "42",
            "[1,2]",
            "null",
            r#""just a string""#,
            r#"{"type":"counter"}"#,
            r#"{"type":"counter","current_count":-1}"#,
            r#"{"type":"counter","current_count":"7"}"#,
            r#"{"type":"posture","ready":"yes"}"#,
        ] {
            let err = BridgeMessage::decode(payload).unwrap_err();
            assert!(matches!(err, EngineError::Decode(_)), "{}", payload);
        }
    }
}
