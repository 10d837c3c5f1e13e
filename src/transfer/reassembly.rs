//! Viewer-side frame reassembly
//!
//! Packets of one frame share an `id`; the end-of-frame packet carries the
//! packet count, which is checked against what actually arrived. A change of
//! `id` before the end-of-frame packet means the tail of the previous frame
//! was lost.

use bytes::{Bytes, BytesMut};
use serde::Serialize;

use super::packet::{count_byte, PacketHeader};
use crate::error::TransferError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReassemblyStats {
    pub packets: u64,
    pub frames: u64,
    /// Frames discarded because packets were missing
    pub incomplete: u64,
}

/// Rebuilds frames from a packet stream
pub struct Reassembler {
    header_size: usize,
    max_frame: usize,
    current: Option<u8>,
    buf: BytesMut,
    received: usize,
    stats: ReassemblyStats,
}

impl Reassembler {
    /// Frames longer than `max_frame` bytes are discarded as incomplete
    pub fn new(header_size: usize, max_frame: usize) -> Self {
        Self {
            header_size,
            max_frame,
            current: None,
            buf: BytesMut::with_capacity(max_frame),
            received: 0,
            stats: ReassemblyStats::default(),
        }
    }

    /// Feed one datagram. Returns the frame when its last packet arrives.
    pub fn push(&mut self, datagram: &[u8]) -> Result<Option<Bytes>, TransferError> {
        let (header, payload) = PacketHeader::parse(datagram, self.header_size)?;
        self.stats.packets += 1;

        if self.current.is_some_and(|id| id != header.id) {
            tracing::debug!(
                id = ?self.current,
                received = self.received,
                "Frame cut short by next frame"
            );
            self.discard();
        }
        self.current = Some(header.id);
        self.received += 1;

        if self.buf.len() + payload.len() > self.max_frame {
            tracing::debug!(id = header.id, "Frame exceeds reassembly limit");
            self.discard();
            return Ok(None);
        }
        self.buf.extend_from_slice(payload);

        if !header.is_eof {
            return Ok(None);
        }

        let complete = count_byte(self.received) == header.packet_count;
        if !complete {
            tracing::debug!(
                id = header.id,
                expected = header.packet_count,
                received = self.received,
                "Incomplete frame"
            );
            self.discard();
            return Ok(None);
        }

        let frame = self.buf.split().freeze();
        self.current = None;
        self.received = 0;
        self.stats.frames += 1;
        Ok(Some(frame))
    }

    fn discard(&mut self) {
        if self.received > 0 {
            self.stats.incomplete += 1;
        }
        self.buf.clear();
        self.current = None;
        self.received = 0;
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }
}
