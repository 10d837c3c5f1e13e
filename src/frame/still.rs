//! Still image read

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::{ConsumerKind, FrameBufferPool, FrameLease};
use crate::sync::Semaphore;

/// Grabs single frames through the `StillCapture` consumer slot
pub struct StillCapture {
    pool: FrameBufferPool,
}

impl StillCapture {
    pub fn new(pool: FrameBufferPool) -> Self {
        Self { pool }
    }

    /// Wait up to `timeout` for the next completed frame and return a copy.
    ///
    /// The consumer is registered only for the duration of the call.
    pub fn capture(&self, timeout: Duration) -> Option<Vec<u8>> {
        let image: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let ready = Arc::new(Semaphore::new(0));

        let slot = image.clone();
        let signal = ready.clone();
        self.pool.register(
            ConsumerKind::StillCapture,
            Arc::new(move |lease: FrameLease| {
                let mut slot = slot.lock();
                if slot.is_none() {
                    *slot = Some(lease.to_vec());
                    signal.signal();
                }
            }),
        );

        let got = ready.wait_timeout(timeout);
        self.pool.deregister(ConsumerKind::StillCapture);

        if !got {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Still capture timed out");
            return None;
        }

        let frame = image.lock().take();
        if let Some(ref bytes) = frame {
            tracing::info!(len = bytes.len(), "Still image captured");
        }
        frame
    }
}
