//! Staging nodes between the capture callback and the transfer worker.
//!
//! The capture driver fills one node per hardware packet and the worker
//! drains them to the transport. Nodes move between three lists:
//!
//! ```text
//!        push (capture)            end_frame (RetainFrame)
//!  free ─────────────────► receiving ───────────────► ready ──► send ──► free
//!    └──────────────── push (DropNewest) ───────────────┘
//! ```
//!
//! What happens when `free` runs dry depends on [`DropPolicy`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::packet::{count_byte, packet_count_for, PacketHeader};
use crate::config::DropPolicy;

/// Decides whether a retained frame is handed to the worker at frame end.
/// Called with the frame generation and the number of retained nodes.
pub type RetainGuard = Arc<dyn Fn(u32, usize) -> bool + Send + Sync>;

struct NodeBuf {
    bytes: Box<[u8]>,
    len: usize,
    generation: u32,
}

struct Staging {
    free: VecDeque<usize>,
    ready: VecDeque<usize>,
    receiving: VecDeque<usize>,
    /// Frame counter, stamped into every node and into the header id
    generation: u32,
    /// DropNewest: discarding until the next frame starts
    draining: bool,
    last_eof: bool,
    /// RetainFrame: discarding until frame end
    dropping: bool,
    /// Packets staged since the last flush request
    batch: usize,
}

/// Result of offering one hardware packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PushOutcome {
    pub staged: bool,
    pub lost: bool,
    /// The worker should be woken to drain `ready`
    pub flush: bool,
}

/// Result of closing a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FrameEnd {
    pub generation: u32,
    pub moved: usize,
    pub discarded: usize,
}

/// List sizes, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCounts {
    pub free: usize,
    pub ready: usize,
    pub receiving: usize,
}

pub(crate) struct NodePool {
    node_len: usize,
    header_len: usize,
    policy: DropPolicy,
    flush_batch: usize,
    buffers: Vec<Mutex<NodeBuf>>,
    staging: Mutex<Staging>,
}

impl NodePool {
    /// `node_len` payload bytes per node, each preceded by `header_len` header bytes
    pub fn new(
        count: usize,
        node_len: usize,
        header_len: usize,
        policy: DropPolicy,
        flush_batch: usize,
    ) -> Self {
        let buffers = (0..count)
            .map(|_| {
                Mutex::new(NodeBuf {
                    bytes: vec![0u8; header_len + node_len].into_boxed_slice(),
                    len: 0,
                    generation: 0,
                })
            })
            .collect();

        Self {
            node_len,
            header_len,
            policy,
            flush_batch: flush_batch.max(1),
            buffers,
            staging: Mutex::new(Staging {
                free: (0..count).collect(),
                ready: VecDeque::with_capacity(count),
                receiving: VecDeque::with_capacity(count),
                generation: 0,
                draining: false,
                last_eof: true,
                dropping: false,
                batch: 0,
            }),
        }
    }

    pub fn node_len(&self) -> usize {
        self.node_len
    }

    /// Offer one hardware packet. Called from capture context; never blocks on the worker.
    pub fn push(&self, data: &[u8], is_eof: bool, frame_len: usize) -> PushOutcome {
        let mut out = PushOutcome::default();
        let mut st = self.staging.lock();

        if !data.is_empty() {
            if st.draining && !is_eof && st.last_eof {
                st.draining = false;
            }
            st.last_eof = is_eof;

            if st.draining && !is_eof {
                out.lost = true;
                return out;
            }

            if st.dropping {
                out.lost = true;
            } else if let Some(idx) = st.free.pop_front() {
                let generation = st.generation;
                drop(st);
                self.fill(idx, data, is_eof, frame_len, generation);
                st = self.staging.lock();
                match self.policy {
                    DropPolicy::DropNewest => st.ready.push_back(idx),
                    DropPolicy::RetainFrame => st.receiving.push_back(idx),
                }
                st.batch += 1;
                out.staged = true;
            } else {
                out.lost = true;
                match self.policy {
                    DropPolicy::DropNewest => {
                        st.draining = true;
                        if is_eof {
                            st.batch = 0;
                            out.flush = true;
                            return out;
                        }
                    }
                    DropPolicy::RetainFrame => {
                        st.dropping = true;
                    }
                }
            }
        }

        if st.batch > 0 && (is_eof || st.batch >= self.flush_batch) {
            st.batch = 0;
            out.flush = true;
        }
        out
    }

    fn fill(&self, idx: usize, data: &[u8], is_eof: bool, frame_len: usize, generation: u32) {
        let n = data.len().min(self.node_len);
        let mut node = self.buffers[idx].lock();
        if self.header_len > 0 {
            let packet_count = if is_eof {
                count_byte(packet_count_for(frame_len, self.node_len))
            } else {
                0
            };
            let header = PacketHeader {
                id: generation as u8,
                is_eof,
                packet_count,
                size: 0,
            };
            header.write_slice(&mut node.bytes[..self.header_len]);
        }
        let start = self.header_len;
        node.bytes[start..start + n].copy_from_slice(&data[..n]);
        node.len = start + n;
        node.generation = generation;
    }

    /// Close the current frame and start the next generation
    pub fn end_frame(&self, guard: Option<&RetainGuard>) -> FrameEnd {
        let mut st = self.staging.lock();
        let generation = st.generation;
        st.dropping = false;
        st.generation = generation.wrapping_add(1);

        let mut end = FrameEnd {
            generation,
            ..FrameEnd::default()
        };
        if st.receiving.is_empty() {
            return end;
        }

        let retained: Vec<usize> = st.receiving.drain(..).collect();
        let current = retained
            .iter()
            .filter(|&&idx| self.buffers[idx].lock().generation == generation)
            .count();
        let accept = guard.map_or(true, |g| g(generation, current));

        for idx in retained {
            if accept && self.buffers[idx].lock().generation == generation {
                st.ready.push_back(idx);
                end.moved += 1;
            } else {
                st.free.push_back(idx);
                end.discarded += 1;
            }
        }
        end
    }

    /// Next node to send, in staging order
    pub fn take_ready(&self) -> Option<usize> {
        self.staging.lock().ready.pop_front()
    }

    /// Read a taken node's datagram
    pub fn with_node<R>(&self, idx: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let node = self.buffers[idx].lock();
        f(&node.bytes[..node.len])
    }

    /// Return a taken node to the free list
    pub fn recycle(&self, idx: usize) {
        self.buffers[idx].lock().len = 0;
        self.staging.lock().free.push_back(idx);
    }

    pub fn counts(&self) -> NodeCounts {
        let st = self.staging.lock();
        NodeCounts {
            free: st.free.len(),
            ready: st.ready.len(),
            receiving: st.receiving.len(),
        }
    }
}
