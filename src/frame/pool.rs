//! Fixed-slot frame buffer pool
//!
//! One producer (capture/encode completion) fills slots; up to four
//! independently paced consumers borrow them. Slot payloads are allocated
//! once and never copied on hand-off. Only the small per-slot metadata sits
//! behind the pool mutex, and every critical section is a few field writes.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::consumer::{ConsumerCallback, ConsumerEntry, ConsumerKind};
use super::{FrameLease, FrameWriter};
use crate::config::PoolConfig;

/// Lifecycle state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    /// Never written, or reset
    Invalid,
    /// Owned by the producer
    Allocated,
    /// Holds a complete frame; reusable once `lock_count` is zero
    Framed,
}

#[derive(Debug, Clone, Copy)]
struct SlotMeta {
    state: SlotState,
    sequence: u32,
    length: usize,
    lock_count: u32,
    /// One bit per consumer holding a lease
    holders: u8,
}

impl SlotMeta {
    const EMPTY: SlotMeta = SlotMeta {
        state: SlotState::Invalid,
        sequence: 0,
        length: 0,
        lock_count: 0,
        holders: 0,
    };

    fn is_reusable(&self) -> bool {
        self.state != SlotState::Allocated && self.lock_count == 0
    }
}

/// Diagnostic view of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub id: usize,
    pub state: SlotState,
    pub sequence: u32,
    pub length: usize,
    pub lock_count: u32,
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStats {
    pub allocated: u64,
    pub exhausted: u64,
    pub delivered: u64,
    pub recycled: u64,
    pub invalid_releases: u64,
}

struct PoolState {
    slots: Vec<SlotMeta>,
    consumers: [ConsumerEntry; ConsumerKind::COUNT],
    /// Last sequence handed out. Survives `reset` so stale handles never match.
    last_sequence: u32,
}

#[derive(Default)]
struct PoolCounters {
    allocated: AtomicU64,
    exhausted: AtomicU64,
    delivered: AtomicU64,
    recycled: AtomicU64,
    invalid_releases: AtomicU64,
}

pub(crate) struct PoolInner {
    pub(super) slot_size: usize,
    pub(super) data: Vec<RwLock<Box<[u8]>>>,
    state: Mutex<PoolState>,
    counters: PoolCounters,
}

type Delivery = Option<(ConsumerCallback, FrameLease)>;

impl PoolInner {
    fn allocate(self: &Arc<Self>) -> Option<FrameWriter> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let pick = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, meta)| meta.is_reusable())
            .min_by_key(|(id, meta)| (meta.sequence, *id))
            .map(|(id, _)| id);

        let Some(slot) = pick else {
            drop(guard);
            self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(slots = self.data.len(), "Frame pool exhausted");
            self.dump();
            return None;
        };

        state.last_sequence = state.last_sequence.wrapping_add(1);
        let sequence = state.last_sequence;
        let meta = &mut state.slots[slot];
        meta.state = SlotState::Allocated;
        meta.sequence = sequence;
        meta.length = 0;
        drop(guard);

        self.counters.allocated.fetch_add(1, Ordering::Relaxed);

        Some(FrameWriter {
            pool: self.clone(),
            slot,
            sequence,
            len: 0,
            done: false,
        })
    }

    pub(super) fn complete(self: &Arc<Self>, slot: usize, sequence: u32, len: usize) {
        let mut deliveries: [Delivery; ConsumerKind::COUNT] = Default::default();
        let mut delivered = 0;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let meta = &mut state.slots[slot];
            if meta.state != SlotState::Allocated || meta.sequence != sequence {
                tracing::debug!(slot, sequence, "Completion for a slot that was reset");
                return;
            }
            meta.state = SlotState::Framed;
            meta.length = len;

            for kind in ConsumerKind::ALL {
                let entry = &mut state.consumers[kind.index()];
                if !entry.is_idle() {
                    continue;
                }
                let Some(callback) = entry.callback.clone() else {
                    continue;
                };
                entry.busy = true;
                let epoch = entry.epoch;
                let meta = &mut state.slots[slot];
                meta.lock_count += 1;
                meta.holders |= kind.mask();
                deliveries[kind.index()] = Some((
                    callback,
                    FrameLease {
                        pool: self.clone(),
                        slot,
                        kind,
                        sequence,
                        epoch,
                        len,
                    },
                ));
                delivered += 1;
            }
        }

        if delivered == 0 {
            self.counters.recycled.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(slot, sequence, "No idle consumer, frame recycled");
            return;
        }

        self.counters
            .delivered
            .fetch_add(delivered, Ordering::Relaxed);
        tracing::trace!(slot, sequence, len, delivered, "Frame complete");

        for (callback, lease) in deliveries.into_iter().flatten() {
            callback(lease);
        }
    }

    pub(super) fn abandon(&self, slot: usize, sequence: u32) {
        let mut state = self.state.lock();
        let meta = &mut state.slots[slot];
        if meta.state == SlotState::Allocated && meta.sequence == sequence {
            meta.state = SlotState::Invalid;
            meta.length = 0;
        }
    }

    /// A lease issued before `kind` was deregistered still pins its slot,
    /// but its release leaves the current registration's `busy` alone.
    pub(super) fn release(&self, slot: usize, kind: ConsumerKind, sequence: u32, epoch: u32) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let meta = &mut state.slots[slot];

        if meta.sequence != sequence || meta.holders & kind.mask() == 0 || meta.lock_count == 0 {
            let lock_count = meta.lock_count;
            drop(guard);
            self.counters.invalid_releases.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(slot, %kind, sequence, lock_count, "Release of a frame not held");
            return;
        }

        meta.holders &= !kind.mask();
        meta.lock_count -= 1;
        let freed = meta.lock_count == 0;
        let entry = &mut state.consumers[kind.index()];
        let current = entry.epoch == epoch;
        if current {
            entry.busy = false;
        }
        drop(guard);

        if !current {
            tracing::debug!(slot, %kind, sequence, "Lease from an earlier registration released");
        }
        if freed {
            tracing::trace!(slot, sequence, "Frame free");
        }
    }

    fn newest_ready(self: &Arc<Self>, kind: ConsumerKind) -> Option<FrameLease> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.consumers[kind.index()].busy {
            return None;
        }

        let slot = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, meta)| meta.state == SlotState::Framed && meta.holders & kind.mask() == 0)
            .max_by_key(|(id, meta)| (meta.sequence, std::cmp::Reverse(*id)))
            .map(|(id, _)| id)?;

        let meta = &mut state.slots[slot];
        meta.lock_count += 1;
        meta.holders |= kind.mask();
        let (sequence, len) = (meta.sequence, meta.length);
        let entry = &mut state.consumers[kind.index()];
        entry.busy = true;
        let epoch = entry.epoch;
        drop(guard);

        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        Some(FrameLease {
            pool: self.clone(),
            slot,
            kind,
            sequence,
            epoch,
            len,
        })
    }

    fn dump(&self) -> Vec<SlotInfo> {
        let infos: Vec<SlotInfo> = {
            let state = self.state.lock();
            state
                .slots
                .iter()
                .enumerate()
                .map(|(id, meta)| SlotInfo {
                    id,
                    state: meta.state,
                    sequence: meta.sequence,
                    length: meta.length,
                    lock_count: meta.lock_count,
                })
                .collect()
        };
        for info in &infos {
            tracing::debug!(
                id = info.id,
                state = ?info.state,
                sequence = info.sequence,
                lock = info.lock_count,
                "Frame slot"
            );
        }
        infos
    }
}

/// Shared handle to a frame buffer pool
#[derive(Clone)]
pub struct FrameBufferPool {
    inner: Arc<PoolInner>,
}

impl FrameBufferPool {
    /// Create a pool of `slot_count` slots of `slot_size` bytes each.
    /// All memory is allocated here.
    pub fn new(slot_count: usize, slot_size: usize) -> Self {
        let data = (0..slot_count)
            .map(|_| RwLock::new(vec![0u8; slot_size].into_boxed_slice()))
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                slot_size,
                data,
                state: Mutex::new(PoolState {
                    slots: vec![SlotMeta::EMPTY; slot_count],
                    consumers: Default::default(),
                    last_sequence: 0,
                }),
                counters: PoolCounters::default(),
            }),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.slot_count, config.slot_size)
    }

    pub fn slot_count(&self) -> usize {
        self.inner.data.len()
    }

    pub fn slot_size(&self) -> usize {
        self.inner.slot_size
    }

    /// Claim the oldest reusable slot for writing.
    ///
    /// Returns `None` when every slot is being written or leased. The
    /// exhaustion is counted and the slot table is logged; the caller drops
    /// this frame and tries again on the next one.
    pub fn allocate(&self) -> Option<FrameWriter> {
        self.inner.allocate()
    }

    /// Lease the newest complete frame, for consumers that pull.
    ///
    /// Returns `None` if `kind` already holds a frame or nothing is ready.
    pub fn get_newest_ready(&self, kind: ConsumerKind) -> Option<FrameLease> {
        self.inner.newest_ready(kind)
    }

    /// Register a push consumer. Replaces any previous callback for `kind`.
    pub fn register(&self, kind: ConsumerKind, callback: ConsumerCallback) {
        let mut state = self.inner.state.lock();
        let entry = &mut state.consumers[kind.index()];
        entry.registered = true;
        entry.callback = Some(callback);
        drop(state);
        tracing::debug!(consumer = %kind, "Consumer registered");
    }

    /// Register `kind` only if nothing holds it yet. Returns false if taken.
    pub fn try_register(&self, kind: ConsumerKind, callback: ConsumerCallback) -> bool {
        let mut state = self.inner.state.lock();
        let entry = &mut state.consumers[kind.index()];
        if entry.registered {
            return false;
        }
        entry.registered = true;
        entry.callback = Some(callback);
        drop(state);
        tracing::debug!(consumer = %kind, "Consumer registered");
        true
    }

    pub fn deregister(&self, kind: ConsumerKind) {
        let mut state = self.inner.state.lock();
        state.consumers[kind.index()].clear();
        drop(state);
        tracing::debug!(consumer = %kind, "Consumer deregistered");
    }

    pub fn is_registered(&self, kind: ConsumerKind) -> bool {
        self.inner.state.lock().consumers[kind.index()].registered
    }

    /// True while `kind` holds a frame
    pub fn is_busy(&self, kind: ConsumerKind) -> bool {
        self.inner.state.lock().consumers[kind.index()].busy
    }

    /// True when no registered consumer could take a frame right now
    pub fn is_workflow_freezing(&self) -> bool {
        !self
            .inner
            .state
            .lock()
            .consumers
            .iter()
            .any(ConsumerEntry::is_idle)
    }

    /// Log and return the state of every slot
    pub fn dump(&self) -> Vec<SlotInfo> {
        self.inner.dump()
    }

    /// Return every slot to `Invalid` and forget outstanding leases.
    ///
    /// Handles issued before the reset become inert: completing a stale
    /// writer or dropping a stale lease does nothing.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.slots.fill(SlotMeta::EMPTY);
        for entry in state.consumers.iter_mut() {
            entry.busy = false;
        }
        drop(state);
        tracing::debug!("Frame pool reset");
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            allocated: c.allocated.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            recycled: c.recycled.load(Ordering::Relaxed),
            invalid_releases: c.invalid_releases.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBufferPool")
            .field("slots", &self.slot_count())
            .field("slot_size", &self.slot_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collecting(pool: &FrameBufferPool, kind: ConsumerKind) -> Arc<Mutex<Vec<FrameLease>>> {
        let held = Arc::new(Mutex::new(Vec::new()));
        let sink = held.clone();
        pool.register(kind, Arc::new(move |lease: FrameLease| sink.lock().push(lease)));
        held
    }

    fn produce(pool: &FrameBufferPool, payload: &[u8]) -> Option<usize> {
        let mut writer = pool.allocate()?;
        writer.write(payload);
        let slot = writer.slot();
        writer.complete();
        Some(slot)
    }

    #[test]
    fn test_allocate_prefers_oldest_then_lowest_id() {
        let pool = FrameBufferPool::new(3, 16);

        // All Invalid with sequence 0: lowest id wins
        assert_eq!(produce(&pool, b"a"), Some(0));
        assert_eq!(produce(&pool, b"b"), Some(1));
        assert_eq!(produce(&pool, b"c"), Some(2));
        // Slot 0 now has the smallest sequence
        assert_eq!(produce(&pool, b"d"), Some(0));
        assert_eq!(produce(&pool, b"e"), Some(1));
    }

    #[test]
    fn test_exhaustion_when_all_slots_allocated() {
        let pool = FrameBufferPool::new(3, 16);
        let writers: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        let sequences: Vec<u32> = writers.iter().map(|w| w.sequence()).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        assert!(pool.allocate().is_none());
        assert_eq!(pool.stats().exhausted, 1);

        // Abandoned writers give their slot back
        drop(writers);
        assert!(pool.allocate().is_some());
    }

    #[test]
    fn test_leased_slot_is_not_reused() {
        let pool = FrameBufferPool::new(2, 16);
        let held = collecting(&pool, ConsumerKind::Network);

        assert_eq!(produce(&pool, b"one"), Some(0));
        assert_eq!(held.lock().len(), 1);

        // Network is busy: frames are recycled, slot 0 stays leased
        assert_eq!(produce(&pool, b"two"), Some(1));
        assert_eq!(produce(&pool, b"three"), Some(1));
        assert_eq!(pool.stats().recycled, 2);

        let w = pool.allocate().unwrap();
        let w2 = pool.allocate();
        assert_eq!(w.slot(), 1);
        assert!(w2.is_none());
        drop(w);

        held.lock().clear();
        assert!(!pool.is_busy(ConsumerKind::Network));
        assert_eq!(produce(&pool, b"four"), Some(0));
    }

    #[test]
    fn test_lease_sees_frame_bytes() {
        let pool = FrameBufferPool::new(2, 8);
        let held = collecting(&pool, ConsumerKind::Display);

        let mut writer = pool.allocate().unwrap();
        assert_eq!(writer.write(b"0123456789"), 8);
        assert_eq!(writer.remaining(), 0);
        writer.complete();

        let lease = held.lock().pop().unwrap();
        assert_eq!(lease.consumer(), ConsumerKind::Display);
        assert_eq!(&*lease.data(), b"01234567");
    }

    #[test]
    fn test_busy_and_unregistered_consumers_skipped() {
        let pool = FrameBufferPool::new(3, 4);
        let net = collecting(&pool, ConsumerKind::Network);
        let rec = collecting(&pool, ConsumerKind::Recorder);

        produce(&pool, b"x");
        assert_eq!(net.lock().len(), 1);
        assert_eq!(rec.lock().len(), 1);
        assert_eq!(pool.dump()[0].lock_count, 2);
        assert!(pool.is_workflow_freezing());

        // Recorder releases, network keeps holding
        rec.lock().clear();
        assert!(!pool.is_workflow_freezing());
        produce(&pool, b"y");
        assert_eq!(net.lock().len(), 1);
        assert_eq!(rec.lock().len(), 1);

        pool.deregister(ConsumerKind::Recorder);
        rec.lock().clear();
        produce(&pool, b"z");
        assert!(rec.lock().is_empty());
        assert!(!pool.is_registered(ConsumerKind::Recorder));
    }

    #[test]
    fn test_stale_lease_does_not_free_new_registration() {
        let pool = FrameBufferPool::new(3, 4);
        let old = collecting(&pool, ConsumerKind::Network);
        produce(&pool, b"a");
        let stale = old.lock().pop().unwrap();

        pool.deregister(ConsumerKind::Network);
        let new = collecting(&pool, ConsumerKind::Network);
        produce(&pool, b"b");
        assert_eq!(new.lock().len(), 1);

        drop(stale);
        assert!(pool.is_busy(ConsumerKind::Network));
        assert_eq!(pool.dump()[0].lock_count, 0);
        assert_eq!(pool.stats().invalid_releases, 0);

        // Still holding "b": "c" must not be delivered
        produce(&pool, b"c");
        assert_eq!(new.lock().len(), 1);
        assert_eq!(&*new.lock()[0].data(), b"b");

        new.lock().clear();
        assert!(!pool.is_busy(ConsumerKind::Network));
    }

    #[test]
    fn test_try_register_keeps_first_owner() {
        let pool = FrameBufferPool::new(2, 4);
        assert!(pool.try_register(ConsumerKind::Network, Arc::new(|_: FrameLease| {})));
        assert!(!pool.try_register(ConsumerKind::Network, Arc::new(|_: FrameLease| {})));
        pool.deregister(ConsumerKind::Network);
        assert!(pool.try_register(ConsumerKind::Network, Arc::new(|_: FrameLease| {})));
    }

    #[test]
    fn test_newest_ready_pull() {
        let pool = FrameBufferPool::new(3, 4);
        assert!(pool.get_newest_ready(ConsumerKind::StillCapture).is_none());

        produce(&pool, b"a");
        produce(&pool, b"b");
        let lease = pool.get_newest_ready(ConsumerKind::StillCapture).unwrap();
        assert_eq!(lease.slot(), 1);
        assert_eq!(&*lease.data(), b"b");

        // One frame in flight per consumer
        assert!(pool.get_newest_ready(ConsumerKind::StillCapture).is_none());
        drop(lease);
        assert!(pool.get_newest_ready(ConsumerKind::StillCapture).is_some());
    }

    #[test]
    fn test_reset_makes_old_handles_inert() {
        let pool = FrameBufferPool::new(2, 4);
        let held = collecting(&pool, ConsumerKind::Network);
        produce(&pool, b"a");
        let writer = pool.allocate().unwrap();

        pool.reset();
        assert!(pool.dump().iter().all(|s| s.state == SlotState::Invalid));

        writer.complete();
        held.lock().clear();
        assert_eq!(pool.stats().invalid_releases, 1);
        assert!(pool.dump().iter().all(|s| s.lock_count == 0));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate,
        Complete,
        Release(usize),
        Pull,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Allocate),
            Just(Op::Complete),
            (0usize..3).prop_map(Op::Release),
            Just(Op::Pull),
        ]
    }

    proptest! {
        #[test]
        fn prop_lock_counts_match_outstanding_leases(ops in proptest::collection::vec(op(), 1..80)) {
            let pool = FrameBufferPool::new(3, 8);
            let held: Arc<Mutex<Vec<FrameLease>>> = Arc::new(Mutex::new(Vec::new()));
            let violations = Arc::new(AtomicU64::new(0));

            for kind in [ConsumerKind::Network, ConsumerKind::Display] {
                let sink = held.clone();
                let watch = pool.clone();
                let bad = violations.clone();
                pool.register(kind, Arc::new(move |lease: FrameLease| {
                    let info = watch.dump()[lease.slot()];
                    if info.state != SlotState::Framed {
                        bad.fetch_add(1, Ordering::Relaxed);
                    }
                    sink.lock().push(lease);
                }));
            }

            let mut writers: Vec<FrameWriter> = Vec::new();
            let mut pulled: Vec<FrameLease> = Vec::new();

            for op in ops {
                match op {
                    Op::Allocate => {
                        if let Some(w) = pool.allocate() {
                            let leased = held.lock().iter().chain(pulled.iter()).any(|l| l.slot() == w.slot());
                            prop_assert!(!leased);
                            writers.push(w);
                        }
                    }
                    Op::Complete => {
                        if !writers.is_empty() {
                            writers.remove(0).complete();
                        }
                    }
                    Op::Release(i) => {
                        let lease = {
                            let mut h = held.lock();
                            if i < h.len() { Some(h.remove(i)) } else { None }
                        };
                        drop(lease);
                    }
                    Op::Pull => {
                        if let Some(l) = pool.get_newest_ready(ConsumerKind::Recorder) {
                            pulled.push(l);
                        } else {
                            pulled.clear();
                        }
                    }
                }

                let infos = pool.dump();
                let h = held.lock();
                for info in infos {
                    let outstanding = h.iter().chain(pulled.iter()).filter(|l| l.slot() == info.id).count();
                    prop_assert_eq!(info.lock_count as usize, outstanding);
                }
            }

            prop_assert_eq!(violations.load(Ordering::Relaxed), 0);
            prop_assert_eq!(pool.stats().invalid_releases, 0);
        }
    }
}
