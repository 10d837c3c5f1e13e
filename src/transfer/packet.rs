//! Video packet wire format
//!
//! ```text
//!  0        1        2              3        4 ........ header_size
//! +--------+--------+--------------+--------+------------------+---------
//! |   id   | is_eof | packet_count |  size  | reserved (zero)  | payload
//! +--------+--------+--------------+--------+------------------+---------
//! ```
//!
//! `packet_count` is only meaningful on the end-of-frame packet, where it
//! holds the number of packets the frame was split into. `size` is reserved
//! and written as zero; the payload runs to the end of the datagram.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::PACKET_HEADER_SIZE;
use crate::error::TransferError;

/// Fixed part of the video packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Low byte of the frame counter
    pub id: u8,
    pub is_eof: bool,
    /// Total packets in the frame, set on the end-of-frame packet only
    pub packet_count: u8,
    pub size: u8,
}

impl PacketHeader {
    /// Append the header, padded with zeros to `header_size`
    pub fn write_to(&self, buf: &mut BytesMut, header_size: usize) {
        buf.put_u8(self.id);
        buf.put_u8(self.is_eof as u8);
        buf.put_u8(self.packet_count);
        buf.put_u8(self.size);
        buf.put_bytes(0, header_size.saturating_sub(PACKET_HEADER_SIZE));
    }

    /// Fill the first `header_size` bytes of `out`
    pub fn write_slice(&self, out: &mut [u8]) {
        out[0] = self.id;
        out[1] = self.is_eof as u8;
        out[2] = self.packet_count;
        out[3] = self.size;
        out[PACKET_HEADER_SIZE..].fill(0);
    }

    /// Split a datagram into header and payload
    pub fn parse(datagram: &[u8], header_size: usize) -> Result<(Self, &[u8]), TransferError> {
        if header_size < PACKET_HEADER_SIZE || datagram.len() < header_size {
            return Err(TransferError::InvalidPacket(format!(
                "{} bytes is shorter than the {} byte header",
                datagram.len(),
                header_size
            )));
        }
        let header = Self {
            id: datagram[0],
            is_eof: datagram[1] != 0,
            packet_count: datagram[2],
            size: datagram[3],
        };
        Ok((header, &datagram[header_size..]))
    }
}

/// Owned packet, as seen by the viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    pub fn decode(datagram: Bytes, header_size: usize) -> Result<Self, TransferError> {
        let (header, _) = PacketHeader::parse(&datagram, header_size)?;
        Ok(Self {
            header,
            payload: datagram.slice(header_size..),
        })
    }

    pub fn encode(&self, header_size: usize) -> Bytes {
        let mut buf = BytesMut::with_capacity(header_size + self.payload.len());
        self.header.write_to(&mut buf, header_size);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Number of packets a frame of `len` bytes splits into
pub fn packet_count_for(len: usize, chunk: usize) -> usize {
    if chunk == 0 {
        return 0;
    }
    len.div_ceil(chunk)
}

/// Saturating conversion for the one-byte count field
pub(crate) fn count_byte(count: usize) -> u8 {
    u8::try_from(count).unwrap_or(u8::MAX)
}

/// Splits frames into headed chunks
#[derive(Debug, Clone, Copy)]
pub struct Packetizer {
    chunk: usize,
}

impl Packetizer {
    pub fn new(chunk: usize) -> Self {
        Self {
            chunk: chunk.max(1),
        }
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Iterate over `(header, payload)` pairs for one frame.
    ///
    /// The total is computed up front, so the end-of-frame packet carries it.
    pub fn packets<'a>(&self, frame_id: u8, frame: &'a [u8]) -> Packets<'a> {
        let total = packet_count_for(frame.len(), self.chunk);
        Packets {
            chunks: frame.chunks(self.chunk),
            frame_id,
            index: 0,
            total,
        }
    }
}

pub struct Packets<'a> {
    chunks: std::slice::Chunks<'a, u8>,
    frame_id: u8,
    index: usize,
    total: usize,
}

impl Packets<'_> {
    pub fn total(&self) -> usize {
        self.total
    }
}

impl<'a> Iterator for Packets<'a> {
    type Item = (PacketHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let payload = self.chunks.next()?;
        self.index += 1;
        let is_eof = self.index == self.total;
        let header = PacketHeader {
            id: self.frame_id,
            is_eof,
            packet_count: if is_eof { count_byte(self.total) } else { 0 },
            size: 0,
        };
        Some((header, payload))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_CHUNK;
    use proptest::prelude::*;

    #[test]
    fn test_3000_byte_frame() {
        let frame = vec![0xABu8; 3000];
        let packets: Vec<_> = Packetizer::new(MAX_CHUNK).packets(7, &frame).collect();

        assert_eq!(packets.len(), 3);
        assert!(!packets[0].0.is_eof);
        assert!(!packets[1].0.is_eof);
        assert!(packets[2].0.is_eof);
        assert_eq!(packets[2].0.packet_count, 3);
        assert_eq!(packets[2].1.len(), 3000 - 2 * MAX_CHUNK);
        assert!(packets.iter().all(|(h, _)| h.id == 7));
    }

    #[test]
    fn test_exact_multiple_and_empty() {
        let frame = vec![1u8; MAX_CHUNK * 2];
        let packets: Vec<_> = Packetizer::new(MAX_CHUNK).packets(0, &frame).collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].0.packet_count, 2);

        assert_eq!(Packetizer::new(MAX_CHUNK).packets(0, &[]).count(), 0);
    }

    #[test]
    fn test_header_layout() {
        let packet = Packet {
            header: PacketHeader {
                id: 0x12,
                is_eof: true,
                packet_count: 3,
                size: 0,
            },
            payload: Bytes::from_static(b"jpg"),
        };
        let wire = packet.encode(8);
        assert_eq!(&wire[..], &[0x12, 1, 3, 0, 0, 0, 0, 0, b'j', b'p', b'g']);

        let decoded = Packet::decode(wire, 8).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_short_datagram_rejected() {
        assert!(PacketHeader::parse(&[1, 0], 4).is_err());
    }

    proptest! {
        #[test]
        fn prop_eof_count_matches_packets(len in 0usize..20_000, chunk in 1usize..2000) {
            let frame = vec![0u8; len];
            let iter = Packetizer::new(chunk).packets(1, &frame);
            let declared = iter.total();
            let packets: Vec<_> = iter.collect();

            prop_assert_eq!(packets.len(), declared);
            prop_assert_eq!(packets.iter().filter(|(h, _)| h.is_eof).count(), usize::from(len > 0));
            if let Some((last, _)) = packets.last() {
                prop_assert!(last.is_eof);
                prop_assert_eq!(last.packet_count, count_byte(packets.len()));
            }
            prop_assert_eq!(packets.iter().map(|(_, p)| p.len()).sum::<usize>(), len);
        }
    }
}
