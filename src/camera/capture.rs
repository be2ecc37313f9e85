use anyhow::Result;
use ndarray::Array4;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use super::frame::{Frame, FramePool};
use crate::error::EngineError;

/// ライブカメラのフレーム列
///
/// `read_frame` はデバイスのネイティブレートでブロックし、次のフレームを返す。
/// ソースは [`CaptureThread::start`] に所有権ごと渡され、停止時に破棄される
/// (デバイス解放)。再開するには新しいソースを開き直す。
pub trait FrameSource: Send + 'static {
    /// 元画像の解像度
    fn resolution(&self) -> (u32, u32);

    /// [1, H, W, 3] のモデル入力テンソルを返す。
    ///
    /// `EngineError::PermissionDenied` / `EngineError::CameraLost` は致命的で
    /// キャプチャを終了させる。それ以外のエラーはフレーム単位で読み飛ばす。
    fn read_frame(&mut self) -> Result<Array4<f32>>;
}

/// キャプチャ通知
pub type FrameCallback = Box<dyn FnMut(Result<Frame>) + Send>;

/// 別スレッドでフレームを取り続け、1枚ごとにコールバックを呼ぶ
pub struct CaptureThread {
    cancel: CancellationToken,
    handle: Option<thread::JoinHandle<()>>,
}

const ERROR_BACKOFF: Duration = Duration::from_millis(100);

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

impl CaptureThread {
    pub fn start(
        mut source: Box<dyn FrameSource>,
        pool: FramePool,
        cancel: CancellationToken,
        mut on_frame: FrameCallback,
    ) -> Result<Self> {
        let resolution = source.resolution();
        let thread_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || {
                let mut next_id: u64 = 0;
                // 停止フラグは毎ステップ先頭で確認する
                while !thread_cancel.is_cancelled() {
                    let tensor = match source.read_frame() {
                        Ok(t) => t,
                        Err(e) => {
                            let fatal = e
                                .downcast_ref::<EngineError>()
                                .map(EngineError::is_fatal)
                                .unwrap_or(false);
                            if fatal {
                                log::error!("capture stopped: {:#}", e);
                                on_frame(Err(e));
                                break;
                            }
                            log::warn!("frame read error: {:#}", e);
                            thread::sleep(ERROR_BACKOFF);
                            continue;
                        }
                    };

                    if thread_cancel.is_cancelled() {
                        break;
                    }

                    next_id += 1;
                    match pool.try_acquire() {
                        Some(lease) => {
                            on_frame(Ok(Frame::new(next_id, now_us(), resolution, tensor, lease)));
                        }
                        None => log::debug!("frame pool exhausted, dropping frame {}", next_id),
                    }
                }
                // source はここで drop される
                log::debug!("capture thread exiting after {} frames", next_id);
            })?;

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// 次のキャプチャステップを無効にする。何度呼んでもよい。
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// スレッド終了を待つ。ブロッキング。
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(feature = "desktop")]
pub use opencv_camera::OpenCvCamera;

#[cfg(feature = "desktop")]
mod opencv_camera {
    use anyhow::{Context, Result};
    use ndarray::Array4;
    use opencv::{
        core::Mat,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureAPIs},
    };

    use super::FrameSource;
    use crate::error::{EngineError, Resource};
    use crate::pose::preprocess::MovenetPreprocessor;

    /// OpenCVを使用したカメラ
    pub struct OpenCvCamera {
        capture: VideoCapture,
        width: u32,
        height: u32,
        empty_streak: u32,
        preprocessor: MovenetPreprocessor,
    }

    /// 空フレームがこれだけ続いたらカメラ喪失とみなす
    const MAX_EMPTY_STREAK: u32 = 30;

    impl OpenCvCamera {
        /// 解像度を指定してカメラを開く
        pub fn open(index: i32, width: u32, height: u32) -> Result<Self> {
            let mut capture = VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32)
                .context("Failed to open camera")?;

            // macOS 等では権限がないと開けない
            if !capture.is_opened()? {
                return Err(EngineError::PermissionDenied { resource: Resource::Camera })
                    .with_context(|| format!("Camera {} is not available", index));
            }

            capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;
            capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;

            let actual_width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
            let actual_height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
            log::info!(
                "camera {} opened: {}x{} @ {} fps",
                index,
                actual_width,
                actual_height,
                capture.get(videoio::CAP_PROP_FPS)?
            );

            Ok(Self {
                capture,
                width: actual_width,
                height: actual_height,
                empty_streak: 0,
                preprocessor: MovenetPreprocessor::new(),
            })
        }
    }

    impl FrameSource for OpenCvCamera {
        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn read_frame(&mut self) -> Result<Array4<f32>> {
            let mut frame = Mat::default();
            let ok = self.capture.read(&mut frame).context("Failed to read frame")?;

            if !ok || frame.empty() {
                self.empty_streak += 1;
                if self.empty_streak >= MAX_EMPTY_STREAK || !self.capture.is_opened()? {
                    return Err(EngineError::CameraLost(format!(
                        "{} consecutive empty frames",
                        self.empty_streak
                    ))
                    .into());
                }
                anyhow::bail!("Empty frame received");
            }
            self.empty_streak = 0;

            self.preprocessor.run(&frame)
        }
    }
}
