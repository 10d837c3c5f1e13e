//! Optional prefix on inbound audio datagrams
//!
//! ```text
//!  0        2                      10
//! +--------+----------------------+-----------
//! |  seq   |  timestamp (u64 BE)  | payload
//! +--------+----------------------+-----------
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::AudioError;

/// Bytes in front of the payload in sequence mode
pub const AUDIO_PREFIX_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPrefix {
    pub sequence: u16,
    pub timestamp: u64,
}

impl AudioPrefix {
    /// Split a sequenced datagram into prefix and payload
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8]), AudioError> {
        if datagram.len() < AUDIO_PREFIX_LEN {
            return Err(AudioError::ShortPacket(datagram.len()));
        }
        let mut head = &datagram[..AUDIO_PREFIX_LEN];
        let prefix = Self {
            sequence: head.get_u16(),
            timestamp: head.get_u64(),
        };
        Ok((prefix, &datagram[AUDIO_PREFIX_LEN..]))
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.sequence);
        buf.put_u64(self.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_big_endian() {
        let mut buf = BytesMut::new();
        AudioPrefix {
            sequence: 0x0102,
            timestamp: 0x0A0B_0C0D_0E0F_1011,
        }
        .write_to(&mut buf);
        buf.extend_from_slice(b"pcm");

        assert_eq!(&buf[..2], &[0x01, 0x02]);
        assert_eq!(&buf[2..10], &[0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11]);

        let (prefix, payload) = AudioPrefix::parse(&buf).unwrap();
        assert_eq!(prefix.sequence, 0x0102);
        assert_eq!(prefix.timestamp, 0x0A0B_0C0D_0E0F_1011);
        assert_eq!(payload, b"pcm");
    }

    #[test]
    fn test_short_datagram() {
        assert!(matches!(
            AudioPrefix::parse(&[0; 9]),
            Err(AudioError::ShortPacket(9))
        ));
    }
}
