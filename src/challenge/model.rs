use serde::{Deserialize, Serialize};

use crate::bridge::BridgeMessage;
use crate::geo::GeoPoint;
use crate::pose::MatchVerdict;

fn default_unlock_radius_km() -> f64 { 0.1 }
fn default_rep_target() -> u32 { 10 }

/// チャレンジの定義 (固定データ)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location_name: String,
    pub location: GeoPoint,
    pub reward_name: String,
    #[serde(default = "default_unlock_radius_km")]
    pub unlock_radius_km: f64,
    /// 完了に必要なレップ数 (埋め込みトラッカー使用時)
    #[serde(default = "default_rep_target")]
    pub rep_target: u32,
}

impl Challenge {
    pub fn london_bridge_pushups() -> Self {
        Self {
            id: "1".to_string(),
            title: "Pushup Challenge".to_string(),
            description: "Complete 10 pushups outside London Bridge".to_string(),
            location_name: "London Bridge".to_string(),
            location: GeoPoint::new(51.5074, -0.0878),
            reward_name: "Pushup Master NFT".to_string(),
            unlock_radius_km: default_unlock_radius_km(),
            rep_target: default_rep_target(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChallengeState {
    Locked,
    Unlockable,
    Active,
    Completed,
}

impl ChallengeState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeState::Locked => "Locked",
            ChallengeState::Unlockable => "Unlockable",
            ChallengeState::Active => "Active",
            ChallengeState::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ChallengeState,
    pub to: ChallengeState,
}

/// 直近の判定。どちらのトラッカーから来たかは問わない
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastVerdict {
    Match(MatchVerdict),
    Bridge(BridgeMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    SustainedMatch,
    RepTarget,
    FallbackTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_from_toml_defaults() {
        let challenge: Challenge = toml::from_str(
            r#"
            id = "2"
            title = "Kindness Challenge"
            description = "Help someone at New Cross"
            location_name = "New Cross"
            reward_name = "Kindness NFT"
            location = { latitude = 51.4749, longitude = -0.0364 }
            "#,
        )
        .unwrap();
        assert_eq!(challenge.unlock_radius_km, 0.1);
        assert_eq!(challenge.rep_target, 10);
        assert_eq!(challenge.location.latitude, 51.4749);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ChallengeState::Unlockable.to_string(), "Unlockable");
    }
}
