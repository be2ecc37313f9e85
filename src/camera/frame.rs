use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 同時に保持できるフレーム数の上限を管理するプール
///
/// キャプチャ側はフレームごとに [`FrameLease`] を取得し、消費側がフレームを
/// 解放 (drop) するとスロットが戻る。
#[derive(Debug, Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    capacity: usize,
    outstanding: AtomicUsize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                capacity: capacity.max(1),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// 現在貸し出し中のフレーム数
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// 空きがなければ None
    pub fn try_acquire(&self) -> Option<FrameLease> {
        let mut current = self.inner.outstanding.load(Ordering::Acquire);
        loop {
            if current >= self.inner.capacity {
                return None;
            }
            match self.inner.outstanding.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(FrameLease {
                        pool: Arc::clone(&self.inner),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// プールのスロット1つ分。drop で返却される。
#[derive(Debug)]
pub struct FrameLease {
    pool: Arc<PoolInner>,
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// カメラから得た1フレーム
///
/// `tensor` はモデル入力形式 [1, H, W, 3] の f32 (0.0-255.0, RGB)。
/// `width` / `height` は元画像の解像度で、キーポイントのピクセル座標変換に使う。
#[derive(Debug)]
pub struct Frame {
    pub id: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub tensor: Array4<f32>,
    _lease: FrameLease,
}

impl Frame {
    pub fn new(
        id: u64,
        timestamp_us: u64,
        (width, height): (u32, u32),
        tensor: Array4<f32>,
        lease: FrameLease,
    ) -> Self {
        Self {
            id,
            timestamp_us,
            width,
            height,
            tensor,
            _lease: lease,
        }
    }

    /// 消費済みフレームを解放してプールに返す
    pub fn release(self) {
        drop(self);
    }
}
