//! # Media Transfer
//!
//! Camera and microphone streaming core for small devices: a frame buffer
//! pool shared by several consumers, a packetizer that pushes frames over a
//! lossy datagram transport, and a flow-controlled audio path.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── DEVICE ────────────────────────────────────┐
//! │                                                                            │
//! │  ┌──────────────┐  on_node_full / on_frame_end                             │
//! │  │ Camera / DMA │──────────────┬──────────────────────────┐                │
//! │  │  (capture)   │              │                          │                │
//! │  └──────────────┘              ▼                          ▼                │
//! │                      ┌──────────────────┐       ┌───────────────────┐      │
//! │                      │  FrameAssembler  │       │    SessionSink    │      │
//! │                      └────────┬─────────┘       │ (staging nodes,   │      │
//! │                               │ complete        │  drop policy)     │      │
//! │                               ▼                 └─────────┬─────────┘      │
//! │  ┌──────────────────────────────────────────┐             │ Flush          │
//! │  │        FrameBufferPool (frame)           │             │                │
//! │  │  slot 0   slot 1   slot 2   ...          │             │                │
//! │  └──┬──────────┬──────────┬──────────┬──────┘             │                │
//! │     │ lease    │ lease    │ lease    │ lease              │                │
//! │     ▼          ▼          ▼          ▼                    ▼                │
//! │  Network    Display    Recorder   StillCapture   ┌─────────────────┐       │
//! │     └───────── Frame(lease) ────────────────────►│ video-transfer  │       │
//! │                                                  │  worker         │       │
//! │                                                  │ (packetize,     │       │
//! │                                                  │  retry, stats)  │       │
//! │                                                  └────────┬────────┘       │
//! │                                                           │ Transport      │
//! │  ┌───────────┐  mailbox   ┌─────────────────┐             │                │
//! │  │  Codec    │◄──────────►│ audio-transfer  │◄── inbound ─┼──────┐         │
//! │  │ (far core)│            │  worker (ring,  │── uplink ───┼───┐  │         │
//! │  └───────────┘            │  watermarks)    │             │   │  │         │
//! │                           └─────────────────┘             │   │  │         │
//! └───────────────────────────────────────────────────────────┼───┼──┼─────────┘
//!                                                             ▼   ▼  │  UDP
//! ┌──────────────────────────────── VIEWER ───────────────────────────┼────────┐
//! │   UdpReceiver ──► Reassembler ──► frames      audio ──────────────┘        │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod actor;
pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod network;
pub mod sync;
pub mod transfer;

pub use error::{Error, ErrorKind, Result};

/// Application-wide constants
pub mod constants {
    /// Fixed part of the video packet header
    pub const PACKET_HEADER_SIZE: usize = 4;

    /// Largest UDP payload that avoids IP fragmentation on Ethernet
    pub const MAX_UDP_PAYLOAD: usize = 1472;

    /// Node payload for stream transports
    pub const TCP_NODE_LEN: usize = 1460;

    /// Video payload per UDP packet with the default header
    pub const MAX_CHUNK: usize = MAX_UDP_PAYLOAD - PACKET_HEADER_SIZE;

    /// Inbound audio losses between warnings
    pub const LOST_LOG_INTERVAL: u32 = 20;

    /// Encoder watermark in bytes
    pub const DEFAULT_READ_SIZE: usize = 160;

    /// Decoder watermark in bytes
    pub const DEFAULT_WRITE_SIZE: usize = 320;
}
