//! Transfer counters
//!
//! Diagnostic only: nothing in the pipeline reads these to make decisions.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Cumulative session counters, updated from both capture and worker context
#[derive(Debug, Default)]
pub struct TransferStats {
    total: AtomicU64,
    lost: AtomicU64,
    pushed: AtomicU64,
    sent: AtomicU64,
    send_failed: AtomicU64,
    frames: AtomicU64,
    frame_len: AtomicUsize,
    frame_len_min: AtomicUsize,
    frame_len_max: AtomicUsize,
}

/// Point-in-time copy of [`TransferStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStatsSnapshot {
    /// Packets offered by the producer
    pub total: u64,
    /// Packets dropped before reaching the transport
    pub lost: u64,
    /// Packets staged for sending
    pub pushed: u64,
    pub sent: u64,
    pub send_failed: u64,
    pub frames: u64,
    pub frame_len: usize,
    pub frame_len_min: usize,
    pub frame_len_max: usize,
}

impl TransferStatsSnapshot {
    /// Fraction of offered packets that never made it onto the wire
    pub fn loss_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.lost + self.send_failed) as f64 / self.total as f64
    }
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_offered(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_lost(&self, n: u64) {
        self.lost.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_pushed(&self, n: u64) {
        self.pushed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failed(&self) {
        self.send_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished frame and its length
    pub(crate) fn record_frame(&self, len: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.frame_len.store(len, Ordering::Relaxed);
        self.frame_len_max.fetch_max(len, Ordering::Relaxed);
        let _ = self
            .frame_len_min
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |min| {
                (min == 0 || len < min).then_some(len)
            });
    }

    pub fn snapshot(&self) -> TransferStatsSnapshot {
        TransferStatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            pushed: self.pushed.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failed: self.send_failed.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            frame_len: self.frame_len.load(Ordering::Relaxed),
            frame_len_min: self.frame_len_min.load(Ordering::Relaxed),
            frame_len_max: self.frame_len_max.load(Ordering::Relaxed),
        }
    }

    pub fn loss_rate(&self) -> f64 {
        self.snapshot().loss_rate()
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.lost.store(0, Ordering::Relaxed);
        self.pushed.store(0, Ordering::Relaxed);
        self.sent.store(0, Ordering::Relaxed);
        self.send_failed.store(0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
        self.frame_len.store(0, Ordering::Relaxed);
        self.frame_len_min.store(0, Ordering::Relaxed);
        self.frame_len_max.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_length_extremes() {
        let stats = TransferStats::new();
        stats.record_frame(5000);
        stats.record_frame(3000);
        stats.record_frame(7000);

        let snap = stats.snapshot();
        assert_eq!(snap.frames, 3);
        assert_eq!(snap.frame_len, 7000);
        assert_eq!(snap.frame_len_min, 3000);
        assert_eq!(snap.frame_len_max, 7000);

        stats.reset();
        assert_eq!(stats.snapshot(), TransferStatsSnapshot::default());
    }

    #[test]
    fn test_loss_rate() {
        let stats = TransferStats::new();
        assert_eq!(stats.snapshot().loss_rate(), 0.0);
        stats.record_offered(10);
        stats.record_lost(2);
        stats.record_send_failed();
        assert!((stats.snapshot().loss_rate() - 0.3).abs() < 1e-9);
    }
}
