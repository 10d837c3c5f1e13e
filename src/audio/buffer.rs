//! Byte ring buffer for audio data
//!
//! Fixed capacity, never overwrites: a write that does not fit is cut short
//! and the caller decides what to do with the rest.

use crate::error::AudioError;

/// Byte FIFO with a fixed capacity
pub struct RingBuffer {
    buf: Box<[u8]>,
    /// Index of the oldest byte
    head: usize,
    fill: usize,
    overflow_count: usize,
    underrun_count: usize,
}

impl RingBuffer {
    /// Create a new ring buffer holding `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            fill: 0,
            overflow_count: 0,
            underrun_count: 0,
        }
    }

    /// Append as much of `data` as fits. Returns the number of bytes taken,
    /// which is never more than [`free_size`](Self::free_size).
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free_size());
        if n < data.len() {
            self.overflow_count += 1;
        }
        if n == 0 {
            return 0;
        }

        let cap = self.capacity();
        let tail = (self.head + self.fill) % cap;
        let first = n.min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.fill += n;
        n
    }

    /// Append all of `data` or nothing
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), AudioError> {
        let free = self.free_size();
        if data.len() > free {
            self.overflow_count += 1;
            return Err(AudioError::RingBufferFull {
                free,
                needed: data.len(),
            });
        }
        self.write(data);
        Ok(())
    }

    /// Move up to `out.len()` bytes out of the buffer
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = self.peek(out);
        if n < out.len() {
            self.underrun_count += 1;
        }
        self.head = if self.capacity() == 0 {
            0
        } else {
            (self.head + n) % self.capacity()
        };
        self.fill -= n;
        n
    }

    /// Copy up to `out.len()` bytes without consuming them
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.fill);
        if n == 0 {
            return 0;
        }
        let cap = self.capacity();
        let first = n.min(cap - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        n
    }

    pub fn free_size(&self) -> usize {
        self.capacity() - self.fill
    }

    pub fn fill_size(&self) -> usize {
        self.fill
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    pub fn is_full(&self) -> bool {
        self.fill == self.capacity()
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.head = 0;
        self.fill = 0;
    }

    /// Writes that were cut short
    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    /// Reads that came back short
    pub fn underrun_count(&self) -> usize {
        self.underrun_count
    }

    pub fn reset_stats(&mut self) {
        self.overflow_count = 0;
        self.underrun_count = 0;
    }

    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        if self.capacity() == 0 {
            return 0.0;
        }
        self.fill as f32 / self.capacity() as f32
    }
}
