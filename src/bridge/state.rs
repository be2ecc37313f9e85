use super::message::BridgeMessage;

/// 埋め込みトラッカーについてホスト側が知っていること。各フィールドは後勝ち。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeState {
    pub rep_count: u32,
    /// ステータスを 1 度でも受け取ったか。受け取るまではモデル読み込み中。
    pub status_received: bool,
    /// 直近のステータスの `ready`。省略されていれば `None`。
    pub ready: Option<bool>,
    pub posture_direction: Option<String>,
    pub last_kind: Option<String>,
}

impl BridgeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, msg: &BridgeMessage) {
        match msg {
            BridgeMessage::RepCounter { current_count } => {
                self.rep_count = *current_count;
            }
            BridgeMessage::PoseTrackerStatus {
                kind,
                ready,
                posture_direction,
            } => {
                self.status_received = true;
                self.ready = *ready;
                self.posture_direction = posture_direction.clone();
                self.last_kind = kind.clone();
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        !self.status_received
    }

    /// ユーザーへの立ち位置の指示。`ready` が明示的に `false` のときだけ位置合わせを促す。
    pub fn placement_hint(&self) -> String {
        if self.is_loading() {
            return "loading AI...".to_string();
        }
        match (self.ready, self.posture_direction.as_deref()) {
            (Some(false), Some(direction)) => format!("Move {}", direction),
            (Some(false), None) => "Adjust your position".to_string(),
            _ => "You can start".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(ready: bool, direction: Option<&str>) -> BridgeMessage {
        BridgeMessage::PoseTrackerStatus {
            kind: Some("posture".into()),
            ready: Some(ready),
            posture_direction: direction.map(String::from),
        }
    }

    #[test]
    fn test_initially_loading() {
        let state = BridgeState::new();
        assert!(state.is_loading());
        assert_eq!(state.rep_count, 0);
        assert_eq!(state.placement_hint(), "loading AI...");
    }

    #[test]
    fn test_last_write_wins() {
        let mut state = BridgeState::new();
        state.apply(&BridgeMessage::RepCounter { current_count: 5 });
        state.apply(&BridgeMessage::RepCounter { current_count: 3 });
        assert_eq!(state.rep_count, 3);

        state.apply(&status(false, Some("left")));
        state.apply(&status(true, None));
        assert_eq!(state.ready, Some(true));
        assert_eq!(state.posture_direction, None);
        // ステータスではカウントは変わらない
        assert_eq!(state.rep_count, 3);
    }

    #[test]
    fn test_placement_hint() {
        let mut state = BridgeState::new();
        state.apply(&status(false, Some("closer")));
        assert_eq!(state.placement_hint(), "Move closer");
        state.apply(&status(false, None));
        assert_eq!(state.placement_hint(), "Adjust your position");
        state.apply(&status(true, None));
        assert_eq!(state.placement_hint(), "You can start");
    }

    #[test]
    fn test_status_without_ready_is_not_placing() {
        let mut state = BridgeState::new();
        state.apply(&BridgeMessage::decode(r#"{"type":"initialization"}"#).unwrap());
        assert!(!state.is_loading());
        assert_eq!(state.ready, None);
        assert_eq!(state.placement_hint(), "You can start");

        // 後から明示的な false が来れば位置合わせに戻る
        state.apply(&status(false, Some("left")));
        assert_eq!(state.placement_hint(), "Move left");
        state.apply(&BridgeMessage::decode(r#"{"type":"posture","postureDirection":"left"}"#).unwrap());
        assert_eq!(state.placement_hint(), "You can start");
    }
}
