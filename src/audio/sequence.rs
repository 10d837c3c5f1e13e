//! Loss detection for sequenced inbound audio

use crate::constants::LOST_LOG_INTERVAL;

/// Tracks the sequence numbers of inbound audio packets.
///
/// A gap is counted as one loss however many packets it spans. The expected
/// value follows the last packet received, so a single reordering costs one
/// loss rather than a cascade.
#[derive(Debug, Default)]
pub struct FlowControlSequence {
    expected_sequence: u16,
    lost_count: u32,
    started: bool,
}

impl FlowControlSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received sequence number. Returns true if a gap was detected.
    pub fn observe(&mut self, sequence: u16, timestamp: u64) -> bool {
        if !self.started {
            self.started = true;
            self.expected_sequence = sequence;
            tracing::debug!(sequence, "First sequenced audio packet");
            return false;
        }

        let gap = sequence != self.expected_sequence.wrapping_add(1);
        if gap {
            self.lost_count += 1;
            tracing::trace!(sequence, timestamp, "Audio sequence gap");
            if self.lost_count % LOST_LOG_INTERVAL == 0 {
                tracing::warn!(lost = self.lost_count, "Inbound audio packets lost");
            }
        }
        self.expected_sequence = sequence;
        gap
    }

    /// Last sequence number received
    pub fn expected_sequence(&self) -> u16 {
        self.expected_sequence
    }

    pub fn lost_count(&self) -> u32 {
        self.lost_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_counted_once() {
        let mut seq = FlowControlSequence::new();
        assert!(!seq.observe(10, 0));
        assert!(!seq.observe(11, 0));
        assert!(seq.observe(13, 0));
        assert_eq!(seq.lost_count(), 1);
        assert_eq!(seq.expected_sequence(), 13);
    }

    #[test]
    fn test_wraparound_is_not_a_gap() {
        let mut seq = FlowControlSequence::new();
        seq.observe(u16::MAX, 0);
        assert!(!seq.observe(0, 0));
        assert_eq!(seq.lost_count(), 0);
    }

    #[test]
    fn test_count_keeps_running_past_log_interval() {
        let mut seq = FlowControlSequence::new();
        seq.observe(0, 0);
        for i in 0..45u16 {
            seq.observe(i * 2 + 2, 0);
        }
        assert_eq!(seq.lost_count(), 45);
    }
}
