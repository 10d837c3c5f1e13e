//! Configuration for the streaming core
//!
//! Loaded from TOML. Every section falls back to the values the deployed
//! firmware uses, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_READ_SIZE, DEFAULT_WRITE_SIZE, MAX_UDP_PAYLOAD, TCP_NODE_LEN};
use crate::error::{Error, Result};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub network: NetworkConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/media-transfer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "media-transfer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default path, falling back to defaults if it is missing
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.transfer.validate()?;

        if self.pool.slot_count == 0 {
            return Err(Error::Config("pool.slot_count must be at least 1".into()));
        }
        if self.pool.slot_size == 0 {
            return Err(Error::Config("pool.slot_size must be non-zero".into()));
        }
        if self.audio.read_size == 0 || self.audio.write_size == 0 {
            return Err(Error::Config("audio read/write sizes must be non-zero".into()));
        }
        if self.audio.ring_frames == 0 {
            return Err(Error::Config("audio.ring_frames must be at least 1".into()));
        }
        Ok(())
    }
}

/// How packets leave the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendType {
    Udp,
    Tcp,
    /// Caller-supplied send function, sized like UDP
    Interface,
    /// Local buffer sink, sized like TCP
    Buffer,
}

/// Camera bus the capture driver is opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenType {
    Sccb,
    Spidma,
}

/// What the session does when staging nodes run out mid-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Drop incoming packets until the frame boundary, flush what was already staged
    DropNewest,
    /// Hold the in-progress frame aside and hand it back at the frame boundary
    RetainFrame,
}

/// Video transfer session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_send_type")]
    pub send_type: SendType,

    #[serde(default = "default_open_type")]
    pub open_type: OpenType,

    /// Wire header size in bytes (4, or 8 with the trailing reserved word)
    #[serde(default = "default_header_size")]
    pub header_size: usize,

    #[serde(default = "default_drop_policy")]
    pub drop_policy: DropPolicy,

    /// Staging nodes shared between the capture callback and the worker
    #[serde(default = "default_node_count")]
    pub node_count: usize,

    /// Send attempts per packet before it is counted as failed
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Staged packets accumulated before the worker is woken
    #[serde(default = "default_flush_batch")]
    pub flush_batch: usize,

    #[serde(default = "default_transfer_queue_depth")]
    pub queue_depth: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            send_type: default_send_type(),
            open_type: default_open_type(),
            header_size: default_header_size(),
            drop_policy: default_drop_policy(),
            node_count: default_node_count(),
            max_retry: default_max_retry(),
            retry_delay_ms: default_retry_delay_ms(),
            flush_batch: default_flush_batch(),
            queue_depth: default_transfer_queue_depth(),
        }
    }
}

impl TransferConfig {
    /// Payload bytes per staging node for this transport
    pub fn node_len(&self) -> usize {
        match (self.send_type, self.open_type) {
            (SendType::Udp, OpenType::Spidma) => MAX_UDP_PAYLOAD,
            (SendType::Udp | SendType::Interface, _) => MAX_UDP_PAYLOAD - self.header_size,
            (SendType::Tcp | SendType::Buffer, _) => TCP_NODE_LEN,
        }
    }

    /// Header bytes the capture side writes in front of each node.
    /// SPI DMA nodes arrive raw.
    pub fn node_header_len(&self) -> usize {
        match self.open_type {
            OpenType::Spidma => 0,
            OpenType::Sccb => self.header_size,
        }
    }

    /// Payload bytes per packet when a whole frame is packetized
    pub fn frame_chunk_len(&self) -> usize {
        self.node_len() + self.node_header_len() - self.header_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.header_size == 0 || self.header_size % 4 != 0 {
            return Err(crate::error::TransferError::HeaderNotAligned(self.header_size).into());
        }
        if self.header_size >= MAX_UDP_PAYLOAD {
            return Err(Error::Config(format!(
                "header_size {} leaves no room for payload",
                self.header_size
            )));
        }
        if self.header_size >= self.node_len() + self.node_header_len() {
            return Err(Error::Config(format!(
                "header_size {} leaves no room for payload in {:?}/{:?} packets",
                self.header_size, self.send_type, self.open_type
            )));
        }
        if self.node_count == 0 || self.flush_batch == 0 || self.queue_depth == 0 {
            return Err(Error::Config(
                "node_count, flush_batch and queue_depth must be non-zero".into(),
            ));
        }
        if self.max_retry == 0 {
            return Err(Error::Config("max_retry must be at least 1".into()));
        }
        Ok(())
    }
}

/// Frame buffer pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,

    /// Bytes per slot; frames longer than this are truncated by the writer
    #[serde(default = "default_slot_size")]
    pub slot_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            slot_size: default_slot_size(),
        }
    }
}

/// Flow-controlled audio path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Encoder watermark: bytes pulled from the codec per read request
    #[serde(default = "default_read_size")]
    pub read_size: usize,

    /// Decoder watermark: bytes pushed to the codec per write request
    #[serde(default = "default_write_size")]
    pub write_size: usize,

    /// Inbound ring capacity in units of `write_size`
    #[serde(default = "default_ring_frames")]
    pub ring_frames: usize,

    /// Inbound packets carry a sequence number and timestamp prefix
    #[serde(default)]
    pub sequence_mode: bool,

    #[serde(default = "default_audio_queue_depth")]
    pub queue_depth: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            read_size: default_read_size(),
            write_size: default_write_size(),
            ring_frames: default_ring_frames(),
            sequence_mode: false,
            queue_depth: default_audio_queue_depth(),
        }
    }
}

impl AudioConfig {
    pub fn ring_capacity(&self) -> usize {
        self.write_size * self.ring_frames
    }
}

/// Socket configuration for the demo binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_video_port")]
    pub video_port: u16,

    #[serde(default = "default_audio_port")]
    pub audio_port: u16,

    #[serde(default = "default_cmd_port")]
    pub cmd_port: u16,

    /// Peer address; the sender streams video here, the receiver streams audio here
    #[serde(default = "default_remote")]
    pub remote: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            video_port: default_video_port(),
            audio_port: default_audio_port(),
            cmd_port: default_cmd_port(),
            remote: default_remote(),
        }
    }
}

fn default_send_type() -> SendType {
    SendType::Udp
}

fn default_open_type() -> OpenType {
    OpenType::Sccb
}

fn default_header_size() -> usize {
    crate::constants::PACKET_HEADER_SIZE
}

fn default_drop_policy() -> DropPolicy {
    DropPolicy::DropNewest
}

fn default_node_count() -> usize {
    32
}

fn default_max_retry() -> u32 {
    4
}

fn default_retry_delay_ms() -> u64 {
    2
}

fn default_flush_batch() -> usize {
    4
}

fn default_transfer_queue_depth() -> usize {
    120
}

fn default_slot_count() -> usize {
    3
}

fn default_slot_size() -> usize {
    64 * 1024
}

fn default_read_size() -> usize {
    DEFAULT_READ_SIZE
}

fn default_write_size() -> usize {
    DEFAULT_WRITE_SIZE
}

fn default_ring_frames() -> usize {
    2
}

fn default_audio_queue_depth() -> usize {
    60
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_video_port() -> u16 {
    7180
}

fn default_audio_port() -> u16 {
    7170
}

fn default_cmd_port() -> u16 {
    7090
}

fn default_remote() -> String {
    "127.0.0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransferError};

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.transfer.header_size, 4);
        assert_eq!(config.transfer.flush_batch, 4);
        assert_eq!(config.pool.slot_count, 3);
        assert_eq!(config.audio.ring_capacity(), 640);
        config.validate().unwrap();
    }

    #[test]
    fn test_node_len_by_transport() {
        let mut t = TransferConfig::default();
        assert_eq!(t.node_len(), 1468);

        t.open_type = OpenType::Spidma;
        assert_eq!(t.node_len(), 1472);

        t.send_type = SendType::Tcp;
        assert_eq!(t.node_len(), 1460);

        t.send_type = SendType::Interface;
        t.header_size = 8;
        assert_eq!(t.node_len(), 1464);
    }

    #[test]
    fn test_frame_chunk_len() {
        let mut t = TransferConfig::default();
        assert_eq!(t.frame_chunk_len(), 1468);

        // Raw SPI nodes fill a whole datagram, so frames leave room for the header
        t.open_type = OpenType::Spidma;
        assert_eq!(t.node_header_len(), 0);
        assert_eq!(t.frame_chunk_len(), 1468);

        t.open_type = OpenType::Sccb;
        t.send_type = SendType::Tcp;
        assert_eq!(t.frame_chunk_len(), 1460);
    }

    #[test]
    fn test_unaligned_header_rejected() {
        let mut config = AppConfig::default();
        config.transfer.header_size = 6;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
        assert!(matches!(
            err,
            Error::Transfer(TransferError::HeaderNotAligned(6))
        ));
    }

    #[test]
    fn test_header_must_leave_payload_room() {
        let mut t = TransferConfig {
            send_type: SendType::Tcp,
            open_type: OpenType::Spidma,
            header_size: 1464,
            ..TransferConfig::default()
        };
        let err = t.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);

        t.header_size = 1456;
        assert!(t.validate().is_ok());
        assert_eq!(t.frame_chunk_len(), 4);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [transfer]
            send_type = "tcp"
            drop_policy = "retain_frame"

            [audio]
            sequence_mode = true
            "#,
        )
        .unwrap();
        assert_eq!(config.transfer.send_type, SendType::Tcp);
        assert_eq!(config.transfer.drop_policy, DropPolicy::RetainFrame);
        assert_eq!(config.transfer.max_retry, 4);
        assert!(config.audio.sequence_mode);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("media-transfer-cfg-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut config = AppConfig::default();
        config.pool.slot_count = 2;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.pool.slot_count, 2);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
