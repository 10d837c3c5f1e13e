//! Watermark flow control between the network side and the codec
//!
//! Two independent credits, one per direction. The encoder reports how
//! much captured audio it holds; once that reaches `read_size` a read is
//! requested. The decoder reports how much it still has to play; once that
//! drops below `write_size`, and a buffer of inbound audio is staged, a write
//! is requested. Each direction has at most one request in flight.

/// A request to issue to the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowRequest {
    /// Fetch this many encoded bytes
    Read(usize),
    /// Hand over the staged buffer of this many bytes
    Write(usize),
}

#[derive(Debug)]
pub struct FlowController {
    read_size: usize,
    write_size: usize,
    read_pending: bool,
    write_pending: bool,
    write_staged: bool,
}

impl FlowController {
    pub fn new(read_size: usize, write_size: usize) -> Self {
        Self {
            read_size,
            write_size,
            read_pending: false,
            write_pending: false,
            write_staged: false,
        }
    }

    /// Encoder reported `used` bytes waiting
    pub fn on_encoder_used(&mut self, used: usize) -> Option<FlowRequest> {
        if used >= self.read_size {
            self.request_read()
        } else {
            None
        }
    }

    /// Codec asked to be read
    pub fn request_read(&mut self) -> Option<FlowRequest> {
        if self.read_pending {
            return None;
        }
        self.read_pending = true;
        Some(FlowRequest::Read(self.read_size))
    }

    pub fn read_done(&mut self) {
        self.read_pending = false;
    }

    /// Decoder reported `remain` bytes left to play
    pub fn on_decoder_remain(&mut self, remain: usize) -> Option<FlowRequest> {
        if remain < self.write_size {
            self.request_write()
        } else {
            None
        }
    }

    /// Codec asked for data
    pub fn request_write(&mut self) -> Option<FlowRequest> {
        if self.write_pending || !self.write_staged {
            return None;
        }
        self.write_pending = true;
        Some(FlowRequest::Write(self.write_size))
    }

    /// The staged buffer was consumed
    pub fn write_done(&mut self) {
        self.write_pending = false;
        self.write_staged = false;
    }

    /// The write request could not be issued; the staged buffer stays
    pub fn write_aborted(&mut self) {
        self.write_pending = false;
    }

    /// A full `write_size` buffer is waiting for the decoder
    pub fn stage_write(&mut self) {
        self.write_staged = true;
    }

    pub fn is_write_staged(&self) -> bool {
        self.write_staged
    }

    pub fn is_read_pending(&self) -> bool {
        self.read_pending
    }

    pub fn is_write_pending(&self) -> bool {
        self.write_pending
    }

    pub fn read_size(&self) -> usize {
        self.read_size
    }

    pub fn write_size(&self) -> usize {
        self.write_size
    }
}
