pub mod capture;
pub mod frame;

pub use capture::{CaptureThread, FrameCallback, FrameSource};
#[cfg(feature = "desktop")]
pub use capture::OpenCvCamera;
pub use frame::{Frame, FrameLease, FramePool};
