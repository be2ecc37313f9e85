pub mod detector;
pub mod keypoint;
pub mod matcher;
#[cfg(feature = "desktop")]
pub mod preprocess;
pub mod target;

#[cfg(feature = "desktop")]
pub use detector::OnnxPoseDetector;
pub use detector::{pose_from_normalized, PoseEstimator};
pub use keypoint::{Keypoint, KeypointIndex, Pose};
pub use matcher::{MatchVerdict, PoseMatcher};
#[cfg(feature = "desktop")]
pub use preprocess::MovenetPreprocessor;
pub use target::{ReferencePoint, TargetPose, TargetPoseLibrary};
