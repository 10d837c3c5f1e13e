//! Flow-controlled audio path

pub mod buffer;
pub mod flow;
pub mod sequence;
pub mod transfer;

pub use buffer::RingBuffer;
pub use flow::{FlowController, FlowRequest};
pub use sequence::FlowControlSequence;
pub use transfer::{AudioCodec, AudioMailboxCodec, AudioMessage, AudioStats, AudioTransfer};
