//! Typed handles onto pool slots.
//!
//! A [`FrameWriter`] is the producer's exclusive claim on an `Allocated`
//! slot. A [`FrameLease`] is a consumer's shared claim on a `Framed` slot;
//! dropping it releases the slot, so a lease can neither be released twice
//! nor forgotten.

use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};
use std::fmt;
use std::sync::Arc;

use super::pool::PoolInner;
use super::ConsumerKind;

/// Producer handle on an allocated slot
pub struct FrameWriter {
    pub(super) pool: Arc<PoolInner>,
    pub(super) slot: usize,
    pub(super) sequence: u32,
    pub(super) len: usize,
    pub(super) done: bool,
}

impl FrameWriter {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes still available in the slot
    pub fn remaining(&self) -> usize {
        self.pool.slot_size - self.len
    }

    /// Append to the frame. Returns the number of bytes stored, short if the slot is full.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        if n > 0 {
            let mut region = self.pool.data[self.slot].write();
            region[self.len..self.len + n].copy_from_slice(&data[..n]);
            self.len += n;
        }
        n
    }

    /// Discard what has been written so far
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Mark the frame complete and hand it to idle consumers
    pub fn complete(mut self) {
        self.done = true;
        self.pool.complete(self.slot, self.sequence, self.len);
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        if !self.done {
            self.pool.abandon(self.slot, self.sequence);
        }
    }
}

impl fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameWriter")
            .field("slot", &self.slot)
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .finish()
    }
}

/// Consumer handle on a completed frame
pub struct FrameLease {
    pub(super) pool: Arc<PoolInner>,
    pub(super) slot: usize,
    pub(super) kind: ConsumerKind,
    pub(super) sequence: u32,
    pub(super) epoch: u32,
    pub(super) len: usize,
}

impl FrameLease {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn consumer(&self) -> ConsumerKind {
        self.kind
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the frame bytes in place
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        let len = self.len;
        RwLockReadGuard::map(self.pool.data[self.slot].read(), |region| &region[..len])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.pool.release(self.slot, self.kind, self.sequence, self.epoch);
    }
}

impl fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLease")
            .field("slot", &self.slot)
            .field("consumer", &self.kind)
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .finish()
    }
}
