use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// トラッキングループの計測値
#[derive(Debug, Default)]
pub struct TrackingStats {
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    inferences: AtomicU64,
    stale_results: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// ある時点の計測値
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    /// 推論されずに上書きされたフレーム
    pub frames_dropped: u64,
    pub inferences: u64,
    /// 停止後に届いて捨てた推論結果
    pub stale_results: u64,
    pub in_flight: usize,
    /// 同時推論数の最大値
    pub max_in_flight: usize,
}

impl TrackingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_capture(&self, displaced: bool) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        if displaced {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_stale(&self) {
        self.stale_results.fetch_add(1, Ordering::Relaxed);
    }

    /// 推論開始。戻り値のガードが drop されると終了扱い。
    pub fn begin_inference(&self) -> InferenceGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
        self.inferences.fetch_add(1, Ordering::Relaxed);
        InferenceGuard { stats: self }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            inferences: self.inferences.load(Ordering::Relaxed),
            stale_results: self.stale_results.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            max_in_flight: self.max_in_flight.load(Ordering::Acquire),
        }
    }
}

pub struct InferenceGuard<'a> {
    stats: &'a TrackingStats,
}

impl Drop for InferenceGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_counts() {
        let stats = TrackingStats::new();
        stats.record_capture(false);
        stats.record_capture(true);
        stats.record_capture(true);
        let s = stats.snapshot();
        assert_eq!(s.frames_captured, 3);
        assert_eq!(s.frames_dropped, 2);
    }

    #[test]
    fn test_inference_guard_tracks_max() {
        let stats = TrackingStats::new();
        {
            let _a = stats.begin_inference();
            assert_eq!(stats.snapshot().in_flight, 1);
            let _b = stats.begin_inference();
            assert_eq!(stats.snapshot().max_in_flight, 2);
        }
        let s = stats.snapshot();
        assert_eq!(s.in_flight, 0);
        assert_eq!(s.max_in_flight, 2);
        assert_eq!(s.inferences, 2);
    }
}
