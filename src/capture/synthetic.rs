//! Software camera producing JPEG-shaped test frames

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CaptureDriver, CaptureSink};
use crate::error::{ActorError, Error};

/// Synthetic camera settings
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// DMA node size
    pub node_len: usize,
    /// Frame sizes cycle through this list
    pub frame_lens: Vec<usize>,
    pub interval: Duration,
    /// Stop after this many frames
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            node_len: crate::constants::MAX_CHUNK,
            frame_lens: vec![12_000, 9_500, 15_200],
            interval: Duration::from_millis(50),
            frame_limit: None,
        }
    }
}

/// Build a frame of `len` bytes: SOI marker, counter-derived body, EOI marker
pub fn test_pattern(frame_no: u64, len: usize) -> Vec<u8> {
    let mut frame: Vec<u8> = (0..len)
        .map(|i| (frame_no as usize).wrapping_add(i) as u8)
        .collect();
    if len >= 4 {
        frame[..2].copy_from_slice(&[0xFF, 0xD8]);
        frame[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
    }
    frame
}

/// Feed one frame to `sink` the way the DMA engine does: node by node, then frame end
pub fn emit_frame(sink: &dyn CaptureSink, frame: &[u8], node_len: usize) {
    let node_len = node_len.max(1);
    let count = frame.len().div_ceil(node_len);
    for (i, node) in frame.chunks(node_len).enumerate() {
        sink.on_node_full(node, i + 1 == count, frame.len());
    }
    sink.on_frame_end();
}

/// Capture driver that generates frames on its own thread
pub struct SyntheticCamera {
    config: SyntheticConfig,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    /// Frames emitted so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Shared frame counter, readable after the camera is handed to a session
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        self.frames.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl CaptureDriver for SyntheticCamera {
    fn start(&mut self, sink: Arc<dyn CaptureSink>) -> crate::Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.config.frame_lens.is_empty() || self.config.node_len == 0 {
            return Err(Error::Config("synthetic camera needs frame sizes and a node size".into()));
        }

        let config = self.config.clone();
        let running = self.running.clone();
        let frames = self.frames.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("camera-dma".into())
            .spawn(move || {
                let mut frame_no: u64 = 0;
                while running.load(Ordering::Relaxed) {
                    if config.frame_limit.is_some_and(|limit| frame_no >= limit) {
                        break;
                    }
                    let len = config.frame_lens[(frame_no as usize) % config.frame_lens.len()];
                    let frame = test_pattern(frame_no, len);
                    emit_frame(sink.as_ref(), &frame, config.node_len);
                    frame_no += 1;
                    frames.store(frame_no, Ordering::Relaxed);
                    thread::sleep(config.interval);
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| ActorError::InitFailed(e.to_string()))?;

        self.thread_handle = Some(handle);
        tracing::info!(node_len = self.config.node_len, "Synthetic camera started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(frames = self.frames(), "Synthetic camera stopped");
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}
