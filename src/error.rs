//! Error types for the media transfer core

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of every error the core can produce.
///
/// Interrupt-context code never returns these; it counts and logs instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No free frame slot, staging node or ring-buffer space. Absorbed by dropping data.
    ResourceExhausted,
    /// The transport kept returning a short count after the retry budget.
    TransportRejected,
    /// A session is already open, or the configuration is malformed.
    ConfigurationInvalid,
    /// Hardware bring-up failed inside the worker task.
    FatalInit,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transfer(e) => e.kind(),
            Error::Audio(e) => e.kind(),
            Error::Actor(e) => e.kind(),
            Error::Config(_) | Error::Toml(_) => ErrorKind::ConfigurationInvalid,
            Error::Io(_) => ErrorKind::Other,
        }
    }
}

/// Video transfer session errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("A transfer session is already open")]
    AlreadyOpen,

    #[error("Packet header size must be a non-zero multiple of 4, got {0}")]
    HeaderNotAligned(usize),

    #[error("Transport accepted {sent} of {expected} bytes")]
    TransportRejected { expected: usize, sent: usize },

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Worker error: {0}")]
    Worker(#[from] ActorError),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::AlreadyOpen | TransferError::HeaderNotAligned(_) => {
                ErrorKind::ConfigurationInvalid
            }
            TransferError::TransportRejected { .. } => ErrorKind::TransportRejected,
            TransferError::Worker(e) => e.kind(),
            TransferError::InvalidPacket(_) => ErrorKind::Other,
        }
    }
}

/// Audio path errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("An audio transfer is already open")]
    AlreadyOpen,

    #[error("Ring buffer full: {free} bytes free, {needed} needed")]
    RingBufferFull { free: usize, needed: usize },

    #[error("Audio packet too short: {0} bytes")]
    ShortPacket(usize),

    #[error("Audio path not ready")]
    NotReady,

    #[error("Codec request failed: {0}")]
    Codec(String),

    #[error("Invalid audio configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker error: {0}")]
    Worker(#[from] ActorError),
}

impl AudioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioError::AlreadyOpen | AudioError::InvalidConfig(_) => {
                ErrorKind::ConfigurationInvalid
            }
            AudioError::RingBufferFull { .. } => ErrorKind::ResourceExhausted,
            AudioError::Worker(e) => e.kind(),
            AudioError::ShortPacket(_) | AudioError::NotReady | AudioError::Codec(_) => {
                ErrorKind::Other
            }
        }
    }
}

/// Worker task and message queue errors
#[derive(Error, Debug)]
pub enum ActorError {
    #[error("Message queue full")]
    QueueFull,

    #[error("Worker has exited")]
    Disconnected,

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker init failed: {0}")]
    InitFailed(String),

    #[error("Worker dropped the request without replying")]
    Abandoned,

    #[error("Message cannot cross the mailbox: {0}")]
    NotMarshallable(&'static str),

    #[error("Malformed mailbox frame: cmd {0:#x}")]
    BadMailboxFrame(u32),
}

impl ActorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActorError::QueueFull => ErrorKind::ResourceExhausted,
            ActorError::InitFailed(_) | ActorError::SpawnFailed(_) => ErrorKind::FatalInit,
            _ => ErrorKind::Other,
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
