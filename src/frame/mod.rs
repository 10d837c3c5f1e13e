//! Frame buffer pool and consumer hand-off

mod consumer;
mod lease;
mod pool;
mod still;

pub use consumer::{ConsumerCallback, ConsumerKind};
pub use lease::{FrameLease, FrameWriter};
pub use pool::{FrameBufferPool, PoolStats, SlotInfo, SlotState};
pub use still::StillCapture;
