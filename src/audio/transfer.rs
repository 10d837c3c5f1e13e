//! Flow-controlled audio transfer worker
//!
//! Sits between the network and a codec running elsewhere (another core,
//! reached through a mailbox). Captured audio is pulled from the encoder in
//! `read_size` pieces and sent uplink; inbound audio is buffered in a ring
//! and pushed to the decoder in `write_size` pieces. Both directions are
//! paced by [`FlowController`].

use bytes::Bytes;
use serde::Serialize;

use super::buffer::RingBuffer;
use super::flow::{FlowController, FlowRequest};
use super::sequence::FlowControlSequence;
use crate::actor::{Actor, LocalQueue, MailboxChannel, MailboxCodec, MailboxFrame, WorkerTask};
use crate::config::AudioConfig;
use crate::error::{ActorError, AudioError, Result};
use crate::network::AudioPrefix;
use crate::sync::Completion;
use crate::transfer::Transport;

/// The codec side of the audio path
pub trait AudioCodec: Send {
    /// Ask the codec to start. Runs on the worker during init.
    fn start(&mut self) -> std::result::Result<(), AudioError>;

    fn stop(&mut self) {}

    /// Request `len` encoded bytes; completion arrives as [`AudioMessage::ReadDone`]
    fn read_req(&mut self, len: usize) -> std::result::Result<(), AudioError>;

    /// Collect the bytes of a completed read
    fn take_read(&mut self, out: &mut [u8]) -> usize;

    /// Hand `data` to the decoder; completion arrives as [`AudioMessage::WriteDone`]
    fn write_req(&mut self, data: &[u8]) -> std::result::Result<(), AudioError>;
}

/// Messages handled by the audio worker
#[derive(Debug)]
pub enum AudioMessage {
    /// Codec finished starting
    Ready,
    EncoderUsedSize(u32),
    DecoderRemainSize(u32),
    /// Codec wants to be read
    ReadReq,
    /// Codec wants data
    WriteReq,
    /// A read finished with this many bytes
    ReadDone(u32),
    WriteDone,
    /// Datagram from the network
    Inbound(Bytes),
    Stats(Completion<AudioStats>),
}

/// Audio path counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AudioStats {
    pub ready: bool,
    pub uplink_sent: u64,
    pub uplink_failed: u64,
    pub inbound: u64,
    /// Inbound packets that arrived before the codec was ready
    pub dropped_early: u64,
    /// Inbound packets skipped because the ring had no room for a whole frame
    pub skipped_full: u64,
    pub malformed: u64,
    pub sequence_lost: u32,
    pub read_requests: u64,
    pub write_requests: u64,
    pub ring_fill: usize,
}

const CMD_READY: u32 = 1;
const CMD_ENCODER_USED: u32 = 2;
const CMD_DECODER_REMAIN: u32 = 3;
const CMD_READ_REQ: u32 = 4;
const CMD_WRITE_REQ: u32 = 5;
const CMD_READ_DONE: u32 = 6;
const CMD_WRITE_DONE: u32 = 7;

/// Marshals codec events for the cross-core mailbox
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioMailboxCodec;

impl MailboxCodec for AudioMailboxCodec {
    type Message = AudioMessage;

    fn encode(&self, msg: AudioMessage) -> std::result::Result<MailboxFrame, ActorError> {
        Ok(match msg {
            AudioMessage::Ready => MailboxFrame::new(CMD_READY),
            AudioMessage::EncoderUsedSize(n) => MailboxFrame::with_param(CMD_ENCODER_USED, n),
            AudioMessage::DecoderRemainSize(n) => MailboxFrame::with_param(CMD_DECODER_REMAIN, n),
            AudioMessage::ReadReq => MailboxFrame::new(CMD_READ_REQ),
            AudioMessage::WriteReq => MailboxFrame::new(CMD_WRITE_REQ),
            AudioMessage::ReadDone(n) => MailboxFrame::with_param(CMD_READ_DONE, n),
            AudioMessage::WriteDone => MailboxFrame::new(CMD_WRITE_DONE),
            AudioMessage::Inbound(_) => return Err(ActorError::NotMarshallable("inbound audio")),
            AudioMessage::Stats(_) => return Err(ActorError::NotMarshallable("stats request")),
        })
    }

    fn decode(&self, frame: MailboxFrame) -> std::result::Result<AudioMessage, ActorError> {
        Ok(match frame.cmd {
            CMD_READY => AudioMessage::Ready,
            CMD_ENCODER_USED => AudioMessage::EncoderUsedSize(frame.param1),
            CMD_DECODER_REMAIN => AudioMessage::DecoderRemainSize(frame.param1),
            CMD_READ_REQ => AudioMessage::ReadReq,
            CMD_WRITE_REQ => AudioMessage::WriteReq,
            CMD_READ_DONE => AudioMessage::ReadDone(frame.param1),
            CMD_WRITE_DONE => AudioMessage::WriteDone,
            other => return Err(ActorError::BadMailboxFrame(other)),
        })
    }
}

struct AudioWorker {
    codec: Box<dyn AudioCodec>,
    uplink: Box<dyn Transport>,
    flow: FlowController,
    ring: RingBuffer,
    sequence: Option<FlowControlSequence>,
    read_buf: Vec<u8>,
    staged: Vec<u8>,
    stats: AudioStats,
}

impl AudioWorker {
    fn new(config: &AudioConfig, codec: Box<dyn AudioCodec>, uplink: Box<dyn Transport>) -> Self {
        Self {
            codec,
            uplink,
            flow: FlowController::new(config.read_size, config.write_size),
            ring: RingBuffer::new(config.ring_capacity()),
            sequence: config.sequence_mode.then(FlowControlSequence::new),
            read_buf: vec![0u8; config.read_size],
            staged: vec![0u8; config.write_size],
            stats: AudioStats::default(),
        }
    }

    fn issue(&mut self, request: Option<FlowRequest>) {
        match request {
            Some(FlowRequest::Read(len)) => {
                self.stats.read_requests += 1;
                if let Err(e) = self.codec.read_req(len) {
                    tracing::debug!(error = %e, "Read request failed");
                    self.flow.read_done();
                }
            }
            Some(FlowRequest::Write(len)) => {
                self.stats.write_requests += 1;
                if let Err(e) = self.codec.write_req(&self.staged[..len]) {
                    tracing::debug!(error = %e, "Write request failed");
                    self.flow.write_aborted();
                }
            }
            None => {}
        }
    }

    fn on_read_done(&mut self, len: usize) {
        self.flow.read_done();
        let want = len.min(self.read_buf.len());
        let n = self.codec.take_read(&mut self.read_buf[..want]);
        if n == 0 {
            return;
        }
        match self.uplink.send(&self.read_buf[..n]) {
            Ok(sent) if sent == n => self.stats.uplink_sent += 1,
            Ok(sent) => {
                self.stats.uplink_failed += 1;
                tracing::debug!(sent, expected = n, "Short audio send");
            }
            Err(e) => {
                self.stats.uplink_failed += 1;
                tracing::debug!(error = %e, "Audio send failed");
            }
        }
    }

    fn on_inbound(&mut self, datagram: &[u8]) {
        self.stats.inbound += 1;
        if !self.stats.ready {
            self.stats.dropped_early += 1;
            return;
        }

        let payload = match self.sequence.as_mut() {
            Some(sequence) => match AudioPrefix::parse(datagram) {
                Ok((prefix, payload)) => {
                    sequence.observe(prefix.sequence, prefix.timestamp);
                    self.stats.sequence_lost = sequence.lost_count();
                    payload
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::debug!(error = %e, "Malformed audio packet");
                    return;
                }
            },
            None => datagram,
        };

        // Whole frames only, so the buffered stream stays frame-aligned
        let write_size = self.flow.write_size();
        if payload.len() != write_size {
            self.stats.malformed += 1;
            tracing::debug!(len = payload.len(), write_size, "Audio packet is not one frame");
            return;
        }
        if let Err(e) = self.ring.write_all(payload) {
            self.stats.skipped_full += 1;
            tracing::debug!(error = %e, "Audio packet skipped");
            return;
        }
        self.stage();
    }

    /// Move one `write_size` piece from the ring into the staging buffer
    fn stage(&mut self) {
        if self.flow.is_write_staged() || self.ring.fill_size() < self.staged.len() {
            return;
        }
        self.ring.read(&mut self.staged);
        self.flow.stage_write();
    }

    fn snapshot(&self) -> AudioStats {
        AudioStats {
            ring_fill: self.ring.fill_size(),
            ..self.stats
        }
    }
}

impl Actor for AudioWorker {
    type Message = AudioMessage;

    fn init(&mut self) -> std::result::Result<(), ActorError> {
        self.codec
            .start()
            .map_err(|e| ActorError::InitFailed(e.to_string()))
    }

    fn handle(&mut self, msg: AudioMessage) {
        match msg {
            AudioMessage::Ready => {
                self.stats.ready = true;
                tracing::info!("Audio codec ready");
            }
            AudioMessage::EncoderUsedSize(used) => {
                let req = self.flow.on_encoder_used(used as usize);
                self.issue(req);
            }
            AudioMessage::DecoderRemainSize(remain) => {
                let req = self.flow.on_decoder_remain(remain as usize);
                self.issue(req);
            }
            AudioMessage::ReadReq => {
                let req = self.flow.request_read();
                self.issue(req);
            }
            AudioMessage::WriteReq => {
                let req = self.flow.request_write();
                self.issue(req);
            }
            AudioMessage::ReadDone(len) => self.on_read_done(len as usize),
            AudioMessage::WriteDone => {
                self.flow.write_done();
                self.stage();
            }
            AudioMessage::Inbound(datagram) => self.on_inbound(&datagram),
            AudioMessage::Stats(done) => done.complete(self.snapshot()),
        }
    }

    fn teardown(&mut self) {
        self.codec.stop();
        self.ring.clear();
        tracing::info!(
            uplink_sent = self.stats.uplink_sent,
            inbound = self.stats.inbound,
            sequence_lost = self.stats.sequence_lost,
            "Audio transfer stopped"
        );
    }
}

/// Handle to the audio worker. At most one transfer runs per handle.
#[derive(Default)]
pub struct AudioTransfer {
    worker: Option<WorkerTask<AudioMessage>>,
}

impl AudioTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the worker. Fails with [`AudioError::AlreadyOpen`] if running.
    pub fn open(
        &mut self,
        config: &AudioConfig,
        codec: impl AudioCodec + 'static,
        uplink: impl Transport + 'static,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Err(AudioError::AlreadyOpen.into());
        }
        if config.read_size == 0 || config.write_size == 0 || config.ring_frames == 0 {
            return Err(AudioError::InvalidConfig(
                "read_size, write_size and ring_frames must be non-zero".into(),
            )
            .into());
        }

        let worker = AudioWorker::new(config, Box::new(codec), Box::new(uplink));
        let task = WorkerTask::spawn("audio-transfer", worker, config.queue_depth)
            .map_err(AudioError::Worker)?;
        tracing::info!(
            read_size = config.read_size,
            write_size = config.write_size,
            sequence_mode = config.sequence_mode,
            "Audio transfer open"
        );
        self.worker = Some(task);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    fn task(&self) -> std::result::Result<&WorkerTask<AudioMessage>, AudioError> {
        self.worker.as_ref().ok_or(AudioError::NotReady)
    }

    /// In-process queue for codec events
    pub fn queue(&self) -> std::result::Result<LocalQueue<AudioMessage>, AudioError> {
        Ok(self.task()?.queue())
    }

    /// Mailbox through which a codec on another core reports events
    pub fn mailbox(&self, depth: usize) -> Result<MailboxChannel<AudioMailboxCodec>> {
        let queue = self.queue()?;
        Ok(MailboxChannel::open(AudioMailboxCodec, queue, depth).map_err(AudioError::Worker)?)
    }

    /// Hand one inbound datagram to the worker. Never blocks.
    pub fn deliver_inbound(&self, datagram: Bytes) -> std::result::Result<(), AudioError> {
        self.task()?
            .post(AudioMessage::Inbound(datagram))
            .map_err(AudioError::Worker)
    }

    pub fn stats(&self) -> Result<AudioStats> {
        Ok(self
            .task()?
            .call(AudioMessage::Stats)
            .map_err(AudioError::Worker)?)
    }

    /// Stop the worker; blocks until it has exited
    pub fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}

impl Drop for AudioTransfer {
    fn drop(&mut self) {
        self.close();
    }
}
