use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 参照キーポイント (信頼度なし)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub x: f32,
    pub y: f32,
}

/// 比較対象のポーズ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPose {
    pub name: String,
    pub keypoints: Vec<ReferencePoint>,
}

impl TargetPose {
    pub fn new(name: impl Into<String>, points: &[(f32, f32)]) -> Self {
        Self {
            name: name.into(),
            keypoints: points.iter().map(|&(x, y)| ReferencePoint { x, y }).collect(),
        }
    }

    pub fn t_pose() -> Self {
        Self::new("T-Pose", &[(200.0, 100.0), (300.0, 100.0)])
    }

    pub fn hands_up() -> Self {
        Self::new("Hands Up", &[(250.0, 50.0), (250.0, 200.0)])
    }
}

/// ターゲットポーズ一覧と現在の選択
#[derive(Debug, Clone)]
pub struct TargetPoseLibrary {
    poses: Vec<TargetPose>,
    current: usize,
}

impl TargetPoseLibrary {
    /// 組み込みポーズ + 追加ポーズ。先頭が初期選択。
    pub fn with_builtin(extra: impl IntoIterator<Item = TargetPose>) -> Self {
        let mut poses = vec![TargetPose::t_pose(), TargetPose::hands_up()];
        poses.extend(extra);
        Self { poses, current: 0 }
    }

    /// 空なら None
    pub fn new(poses: Vec<TargetPose>) -> Option<Self> {
        if poses.is_empty() {
            return None;
        }
        Some(Self { poses, current: 0 })
    }

    pub fn current(&self) -> &TargetPose {
        &self.poses[self.current]
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn select(&mut self, name: &str) -> Option<&TargetPose> {
        let index = self.poses.iter().position(|p| p.name == name)?;
        self.current = index;
        Some(&self.poses[index])
    }

    /// 「New Pose」: 現在と異なるポーズを無作為に選ぶ
    pub fn next_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &TargetPose {
        let candidates: Vec<usize> = (0..self.poses.len()).filter(|&i| i != self.current).collect();
        if let Some(&index) = candidates.choose(rng) {
            self.current = index;
        }
        self.current()
    }
}
