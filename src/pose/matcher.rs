use serde::Serialize;

use super::keypoint::Pose;
use super::target::TargetPose;
use crate::config::MatcherConfig;

/// 採点結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchVerdict {
    pub score: usize,
    pub matched: bool,
}

/// インデックス対応による粗いポーズ照合
///
/// 検出キーポイント i と参照キーポイント i を対にし、ピクセル距離が
/// `tolerance_px` 未満なら 1 点。`score > majority_threshold` で一致。
/// 名前ではなく並び順で対応付ける (参照データがインデックス揃えのため)。
#[derive(Debug, Clone)]
pub struct PoseMatcher {
    tolerance_px: f32,
    majority_threshold: usize,
    min_confidence: f32,
}

impl PoseMatcher {
    pub fn new(tolerance_px: f32, majority_threshold: usize) -> Self {
        Self {
            tolerance_px,
            majority_threshold,
            min_confidence: 0.0,
        }
    }

    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.tolerance_px, config.majority_threshold)
            .with_min_confidence(config.min_keypoint_confidence)
    }

    /// 信頼度がこれ未満の検出点は採点しない
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn tolerance_px(&self) -> f32 {
        self.tolerance_px
    }

    pub fn majority_threshold(&self) -> usize {
        self.majority_threshold
    }

    pub fn score(&self, detected: &Pose, target: &TargetPose) -> MatchVerdict {
        // zip は短い方で止まる: 対のないインデックスは 0 点
        let score = detected
            .keypoints
            .iter()
            .zip(target.keypoints.iter())
            .filter(|(kp, _)| kp.is_valid(self.min_confidence))
            .filter(|(kp, reference)| kp.distance_to(reference.x, reference.y) < self.tolerance_px)
            .count();

        MatchVerdict {
            score,
            matched: score > self.majority_threshold,
        }
    }
}

impl Default for PoseMatcher {
    fn default() -> Self {
        Self::from_config(&MatcherConfig::default())
    }
}
