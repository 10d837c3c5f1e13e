//! Collects DMA nodes into frame buffer pool slots

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::CaptureSink;
use crate::frame::{FrameBufferPool, FrameWriter};

/// Assembler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssemblerStats {
    pub frames: u64,
    /// Nodes discarded because no slot was free
    pub lost: u64,
    pub truncated: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    lost: AtomicU64,
    truncated: AtomicU64,
}

struct State {
    writer: Option<FrameWriter>,
    /// No slot for the current frame: drop nodes until its end
    dropping: bool,
}

/// [`CaptureSink`] that writes each frame into a pool slot and completes it at frame end
pub struct FrameAssembler {
    pool: FrameBufferPool,
    state: Mutex<State>,
    counters: Counters,
}

impl FrameAssembler {
    pub fn new(pool: FrameBufferPool) -> Self {
        Self {
            pool,
            state: Mutex::new(State {
                writer: None,
                dropping: false,
            }),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> AssemblerStats {
        AssemblerStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
            truncated: self.counters.truncated.load(Ordering::Relaxed),
        }
    }
}

impl CaptureSink for FrameAssembler {
    fn on_node_full(&self, data: &[u8], _is_eof: bool, _frame_len: usize) {
        let mut state = self.state.lock();
        if state.dropping {
            self.counters.lost.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if state.writer.is_none() {
            match self.pool.allocate() {
                Some(writer) => state.writer = Some(writer),
                None => {
                    state.dropping = true;
                    self.counters.lost.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        if let Some(writer) = state.writer.as_mut() {
            if writer.write(data) < data.len() {
                self.counters.truncated.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn on_frame_end(&self) {
        let writer = {
            let mut state = self.state.lock();
            state.dropping = false;
            state.writer.take()
        };
        // Completion runs consumer callbacks: keep it outside our own lock
        if let Some(writer) = writer {
            writer.complete();
            self.counters.frames.fetch_add(1, Ordering::Relaxed);
        }
    }
}
