use anyhow::Result;

use super::keypoint::{Keypoint, KeypointIndex, Pose};
use crate::camera::Frame;

/// 1フレーム分の姿勢推定
///
/// 実装は重くてよい (ブロッキング)。トラッキングループは同時に1回しか呼ばない。
pub trait PoseEstimator: Send {
    /// 人物が検出されなければ `Ok(None)`
    fn estimate(&mut self, frame: &Frame) -> Result<Option<Pose>>;
}

/// 正規化座標 (y, x, confidence) × 17 を名前付きピクセル座標の Pose に変換する
///
/// 平均信頼度が `min_pose_confidence` 未満なら人物なしとみなす。
pub fn pose_from_normalized(
    rows: &[[f32; 3]],
    frame: &Frame,
    min_pose_confidence: f32,
) -> Option<Pose> {
    let keypoints: Vec<Keypoint> = rows
        .iter()
        .take(KeypointIndex::COUNT)
        .enumerate()
        .map(|(i, &[y, x, confidence])| {
            let name = KeypointIndex::from_index(i).map(KeypointIndex::name).unwrap_or("unknown");
            Keypoint::new(
                name,
                x * frame.width as f32,
                y * frame.height as f32,
                confidence,
            )
        })
        .collect();

    let pose = Pose::new(keypoints, frame.timestamp_us, frame.id);
    if pose.is_empty() || pose.average_confidence() < min_pose_confidence {
        return None;
    }
    Some(pose)
}

#[cfg(feature = "desktop")]
pub use onnx::OnnxPoseDetector;

#[cfg(feature = "desktop")]
mod onnx {
    use anyhow::{Context, Result};
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::path::Path;

    use super::{pose_from_normalized, PoseEstimator};
    use crate::camera::Frame;
    use crate::error::EngineError;
    use crate::pose::keypoint::{KeypointIndex, Pose};

    /// MoveNet (ONNX) を使用した姿勢推定器
    pub struct OnnxPoseDetector {
        session: Session,
        min_pose_confidence: f32,
    }

    impl OnnxPoseDetector {
        /// ONNXモデルを読み込んで初期化。失敗は `EngineError::ModelLoad`。
        pub fn new<P: AsRef<Path>>(model_path: P, min_pose_confidence: f32) -> Result<Self> {
            let path = model_path.as_ref();
            let session = Session::builder()
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.commit_from_file(path))
                .map_err(|e| EngineError::ModelLoad(format!("{}: {}", path.display(), e)))?;

            log::info!("pose model loaded from {}", path.display());
            Ok(Self {
                session,
                min_pose_confidence,
            })
        }
    }

    impl PoseEstimator for OnnxPoseDetector {
        /// 入力: [1, 192, 192, 3] の f32 テンソル
        fn estimate(&mut self, frame: &Frame) -> Result<Option<Pose>> {
            let input_tensor = Tensor::from_array(frame.tensor.clone())?;
            let outputs = self
                .session
                .run(ort::inputs!["serving_default_input_0" => input_tensor])
                .context("Inference failed")?;

            // MoveNet の出力は [1, 1, 17, 3] (y, x, confidence)
            let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
                .try_extract_array()
                .context("Failed to extract output tensor")?;

            let mut rows = [[0.0f32; 3]; KeypointIndex::COUNT];
            for (i, row) in rows.iter_mut().enumerate() {
                *row = [
                    output[[0, 0, i, 0]],
                    output[[0, 0, i, 1]],
                    output[[0, 0, i, 2]],
                ];
            }

            Ok(pose_from_normalized(&rows, frame, self.min_pose_confidence))
        }
    }
}
