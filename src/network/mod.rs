//! Network collaborators: UDP transport and inbound audio framing

pub mod framing;
pub mod udp;

pub use framing::{AudioPrefix, AUDIO_PREFIX_LEN};
pub use udp::{create_socket, Datagram, ReceiverStats, UdpReceiver, UdpTransport};
