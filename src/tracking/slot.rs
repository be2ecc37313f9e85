use std::sync::Mutex;

use crate::camera::Frame;

/// 最新フレームだけを保持する1枠のバッファ
///
/// 推論中に届いたフレームは前のフレームを上書きする (キューしない)。
/// 上書きされたフレームはその場で解放される。
#[derive(Debug, Default)]
pub struct LatestFrameSlot {
    latest: Mutex<Option<Frame>>,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しいフレームを置く。置き換えが起きたら true (前のフレームは破棄)。
    pub fn put(&self, frame: Frame) -> bool {
        let displaced = match self.latest.lock() {
            Ok(mut guard) => guard.replace(frame),
            Err(poisoned) => poisoned.into_inner().replace(frame),
        };
        match displaced {
            Some(old) => {
                old.release();
                true
            }
            None => false,
        }
    }

    /// 最新フレームを取り出す
    pub fn take(&self) -> Option<Frame> {
        match self.latest.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// 残っているフレームを解放する
    pub fn clear(&self) {
        if let Some(frame) = self.take() {
            frame.release();
        }
    }
}
