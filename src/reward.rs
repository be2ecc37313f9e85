use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// 完了したチャレンジの報酬を発行し、そのアドレスを返す。
pub trait RewardMinter: Send {
    fn mint(&self, challenge_title: &str, reward_name: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardReceipt {
    pub reward_name: String,
    pub address: String,
    pub completed_at: DateTime<Utc>,
}

/// オフライン用。アドレスはチャレンジ名と報酬名だけから決まる (SHA-256 を base58 で表記)。
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoMinter;

impl RewardMinter for DemoMinter {
    fn mint(&self, challenge_title: &str, reward_name: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(challenge_title.as_bytes());
        hasher.update(reward_name.as_bytes());
        let address = bs58::encode(hasher.finalize()).into_string();
        log::info!("minted {:?} for {:?}: {}", reward_name, challenge_title, address);
        Ok(address)
    }
}
