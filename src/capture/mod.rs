//! Capture driver boundary
//!
//! The camera/DMA driver is not part of this crate. It calls a
//! [`CaptureSink`] once per filled DMA node and once at end of frame.
//! [`SyntheticCamera`] stands in for real hardware in tests and the demo
//! sender; [`FrameAssembler`] collects nodes into frame buffer pool slots.

mod assembler;
mod synthetic;

pub use assembler::{AssemblerStats, FrameAssembler};
pub use synthetic::{emit_frame, test_pattern, SyntheticCamera, SyntheticConfig};

use std::sync::Arc;

/// Callbacks invoked by the capture driver, from its interrupt-like context
pub trait CaptureSink: Send + Sync {
    /// One DMA node is full. `frame_len` is only meaningful when `is_eof` is set.
    fn on_node_full(&self, data: &[u8], is_eof: bool, frame_len: usize);

    /// The driver has finished a frame
    fn on_frame_end(&self);
}

/// Hardware capture driver
pub trait CaptureDriver: Send {
    /// Bring up the hardware and start delivering to `sink`
    fn start(&mut self, sink: Arc<dyn CaptureSink>) -> crate::Result<()>;

    /// Stop delivery. No sink callback runs after this returns.
    fn stop(&mut self);
}
