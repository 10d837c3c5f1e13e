//! Frame consumers and their registry entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::FrameLease;

/// Identity of a frame consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerKind {
    /// Packetizer feeding the remote viewer
    Network,
    /// Local decoder/display
    Display,
    /// Local recorder
    Recorder,
    /// One-shot still image read
    StillCapture,
}

impl ConsumerKind {
    pub const COUNT: usize = 4;

    /// Delivery order on completion
    pub const ALL: [ConsumerKind; Self::COUNT] = [
        ConsumerKind::Network,
        ConsumerKind::Display,
        ConsumerKind::Recorder,
        ConsumerKind::StillCapture,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            ConsumerKind::Network => 0,
            ConsumerKind::Display => 1,
            ConsumerKind::Recorder => 2,
            ConsumerKind::StillCapture => 3,
        }
    }

    pub(crate) fn mask(self) -> u8 {
        1 << self.index()
    }
}

impl fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerKind::Network => "network",
            ConsumerKind::Display => "display",
            ConsumerKind::Recorder => "recorder",
            ConsumerKind::StillCapture => "still_capture",
        };
        f.write_str(name)
    }
}

/// Invoked with a lease on each completed frame. Dropping the lease releases it.
///
/// Runs on the producer's context: must not block.
pub type ConsumerCallback = Arc<dyn Fn(FrameLease) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ConsumerEntry {
    pub registered: bool,
    pub busy: bool,
    pub callback: Option<ConsumerCallback>,
    /// Bumped on every registration change; leases carry the value they were issued under
    pub epoch: u32,
}

impl ConsumerEntry {
    /// Drop the registration, keeping the epoch moving forward
    pub fn clear(&mut self) {
        *self = ConsumerEntry {
            epoch: self.epoch.wrapping_add(1),
            ..ConsumerEntry::default()
        };
    }

    /// Registered, has somewhere to deliver, and has no frame in flight
    pub fn is_idle(&self) -> bool {
        self.registered && !self.busy && self.callback.is_some()
    }
}
