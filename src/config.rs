use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::pose::TargetPose;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// 組み込みポーズに追加するターゲットポーズ
    #[serde(default)]
    pub target_poses: Vec<TargetPose>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeoConfig {
    /// チャレンジ開始可能な半径 (km)
    #[serde(default = "default_unlock_radius_km")]
    pub unlock_radius_km: f64,
}

fn default_unlock_radius_km() -> f64 { 0.1 }

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            unlock_radius_km: default_unlock_radius_km(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatcherConfig {
    /// 一致とみなす距離 (ピクセル)
    #[serde(default = "default_tolerance_px")]
    pub tolerance_px: f32,
    /// score がこの値を超えたら一致
    #[serde(default = "default_majority_threshold")]
    pub majority_threshold: usize,
    /// これ未満の信頼度のキーポイントは採点しない
    #[serde(default = "default_min_keypoint_confidence")]
    pub min_keypoint_confidence: f32,
}

fn default_tolerance_px() -> f32 { 50.0 }
fn default_majority_threshold() -> usize { 3 }
fn default_min_keypoint_confidence() -> f32 { 0.0 }

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tolerance_px: default_tolerance_px(),
            majority_threshold: default_majority_threshold(),
            min_keypoint_confidence: default_min_keypoint_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    /// ループの目標レート (描画レートに合わせる)
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    /// 完了に必要な連続一致時間 (ミリ秒)
    #[serde(default = "default_sustain_ms")]
    pub sustain_ms: u64,
    /// 平均信頼度がこれ未満なら「人物なし」
    #[serde(default = "default_min_pose_confidence")]
    pub min_pose_confidence: f32,
    /// フレームバッファの数
    #[serde(default = "default_frame_buffers")]
    pub frame_buffers: usize,
}

fn default_target_fps() -> u32 { 30 }
fn default_sustain_ms() -> u64 { 2000 }
fn default_min_pose_confidence() -> f32 { 0.2 }
fn default_frame_buffers() -> usize { 3 }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            sustain_ms: default_sustain_ms(),
            min_pose_confidence: default_min_pose_confidence(),
            frame_buffers: default_frame_buffers(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: String,
}

fn default_model_path() -> String { "models/movenet_lightning.onnx".to_string() }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_tracking_url")]
    pub tracking_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_exercise")]
    pub exercise: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_view_width")]
    pub width: u32,
    #[serde(default = "default_view_height")]
    pub height: u32,
    /// "front" または "back"
    #[serde(default = "default_facing")]
    pub camera: String,
    /// 一定時間後に完了とみなす (暫定)
    #[serde(default)]
    pub fallback_enabled: bool,
    #[serde(default = "default_fallback_timeout_secs")]
    pub fallback_timeout_secs: u64,
}

fn default_tracking_url() -> String { "https://app.posetracker.com/pose_tracker/tracking".to_string() }
fn default_exercise() -> String { "squat".to_string() }
fn default_difficulty() -> String { "easy".to_string() }
fn default_view_width() -> u32 { 390 }
fn default_view_height() -> u32 { 844 }
fn default_facing() -> String { "front".to_string() }
fn default_fallback_timeout_secs() -> u64 { 60 }

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tracking_url: default_tracking_url(),
            api_key: String::new(),
            exercise: default_exercise(),
            difficulty: default_difficulty(),
            width: default_view_width(),
            height: default_view_height(),
            camera: default_facing(),
            fallback_enabled: false,
            fallback_timeout_secs: default_fallback_timeout_secs(),
        }
    }
}

/// 推論の実行場所
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    /// カメラ + ローカル推論
    Local,
    /// 埋め込みトラッキングサービスに委譲
    Bridge,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_mode")]
    pub mode: InferenceMode,
    /// ジオフェンス離脱時に回数を保持するか
    #[serde(default)]
    pub keep_progress_on_exit: bool,
}

fn default_mode() -> InferenceMode { InferenceMode::Bridge }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            keep_progress_on_exit: false,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid config")?;
        Ok(config)
    }

    /// 読み込みに失敗したらデフォルト値を使う
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }
}
