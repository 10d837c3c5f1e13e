//! Device-side demo
//!
//! Streams synthetic camera frames to the viewer over UDP and runs the
//! audio path against a loopback codec.
//!
//! Usage: `sender [config.toml] [--nodes]`
//!
//! With `--nodes` the camera feeds the session's staging nodes directly;
//! otherwise frames go through the frame buffer pool.

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_transfer::{
    actor::{Deliver, LocalQueue},
    audio::{AudioCodec, AudioMessage, AudioTransfer},
    capture::{CaptureDriver, FrameAssembler, SyntheticCamera, SyntheticConfig},
    config::AppConfig,
    error::AudioError,
    frame::FrameBufferPool,
    network::{create_socket, Datagram, UdpReceiver, UdpTransport},
    transfer::{TransferSession, TransferSetup},
};

/// Codec stand-in: answers every request immediately with a test tone
struct LoopbackCodec {
    events: Arc<Mutex<Option<LocalQueue<AudioMessage>>>>,
    phase: u8,
}

impl LoopbackCodec {
    fn notify(&self, msg: AudioMessage) -> std::result::Result<(), AudioError> {
        match self.events.lock().as_ref() {
            Some(queue) => queue.post(msg).map_err(AudioError::Worker),
            None => Err(AudioError::NotReady),
        }
    }
}

impl AudioCodec for LoopbackCodec {
    fn start(&mut self) -> std::result::Result<(), AudioError> {
        Ok(())
    }

    fn read_req(&mut self, len: usize) -> std::result::Result<(), AudioError> {
        self.notify(AudioMessage::ReadDone(len as u32))
    }

    fn take_read(&mut self, out: &mut [u8]) -> usize {
        for b in out.iter_mut() {
            *b = self.phase;
            self.phase = self.phase.wrapping_add(3);
        }
        out.len()
    }

    fn write_req(&mut self, _data: &[u8]) -> std::result::Result<(), AudioError> {
        self.notify(AudioMessage::WriteDone)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting media sender");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let node_mode = args.iter().any(|a| a == "--nodes");
    let config = match args.iter().find(|a| !a.starts_with("--")) {
        Some(path) => AppConfig::load(&PathBuf::from(path))?,
        None => AppConfig::load_or_default()?,
    };
    config.validate()?;

    let net = &config.network;
    let bind: SocketAddr = format!("{}:0", net.bind_address)
        .parse()
        .context("invalid bind address")?;
    let video_remote: SocketAddr = format!("{}:{}", net.remote, net.video_port)
        .parse()
        .context("invalid remote address")?;
    let audio_remote: SocketAddr = format!("{}:{}", net.remote, net.audio_port)
        .parse()
        .context("invalid remote address")?;

    // Video
    let pool = FrameBufferPool::from_config(&config.pool);
    let camera = SyntheticCamera::new(SyntheticConfig {
        node_len: config.transfer.node_len(),
        ..SyntheticConfig::default()
    });
    let frames = camera.frame_counter();

    let setup = TransferSetup::new(config.transfer.clone(), UdpTransport::bind(bind, video_remote)?)
        .on_start(move || tracing::info!(%video_remote, "Video streaming started"))
        .on_end(|| tracing::info!("Video streaming ended"));

    let mut pool_camera = None;
    let session = if node_mode {
        TransferSession::open(&pool, setup.with_driver(camera))?
    } else {
        let session = TransferSession::open(&pool, setup)?;
        let mut camera = camera;
        camera.start(Arc::new(FrameAssembler::new(pool.clone())))?;
        pool_camera = Some(camera);
        session
    };

    // Audio
    let events = Arc::new(Mutex::new(None));
    let mut audio = AudioTransfer::new();
    audio.open(
        &config.audio,
        LoopbackCodec {
            events: events.clone(),
            phase: 0,
        },
        UdpTransport::bind(bind, audio_remote)?,
    )?;
    let audio_queue = audio.queue()?;
    *events.lock() = Some(audio_queue.clone());
    audio_queue.post(AudioMessage::Ready)?;

    let audio_bind: SocketAddr = format!("{}:{}", net.bind_address, net.audio_port)
        .parse()
        .context("invalid bind address")?;
    let (inbound_tx, inbound_rx) = bounded::<Datagram>(256);
    let mut inbound = UdpReceiver::start(create_socket(audio_bind, None)?, inbound_tx)?;

    let read_size = config.audio.read_size as u32;
    let mut tick = tokio::time::interval(Duration::from_millis(20));
    let mut report = tokio::time::interval(Duration::from_secs(5));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tick.tick() => {
                while let Ok(datagram) = inbound_rx.try_recv() {
                    if let Err(e) = audio.deliver_inbound(datagram.payload) {
                        tracing::debug!(error = %e, "Inbound audio dropped");
                    }
                }
                // The loopback encoder always has one read's worth ready
                for msg in [AudioMessage::EncoderUsedSize(read_size), AudioMessage::DecoderRemainSize(0)] {
                    if let Err(e) = audio_queue.post(msg) {
                        tracing::warn!(error = %e, "Failed to post audio event");
                    }
                }
            }
            _ = report.tick() => {
                let video = session.stats();
                let pool_stats = pool.stats();
                tracing::info!(
                    frames = frames.load(std::sync::atomic::Ordering::Relaxed),
                    sent = video.sent,
                    lost = video.lost,
                    send_failed = video.send_failed,
                    loss_pct = video.loss_rate() * 100.0,
                    frame_len = video.frame_len,
                    pool_exhausted = pool_stats.exhausted,
                    "Video stats"
                );
                if let Ok(stats) = audio.stats() {
                    tracing::info!(
                        uplink = stats.uplink_sent,
                        inbound = stats.inbound,
                        skipped = stats.skipped_full,
                        seq_lost = stats.sequence_lost,
                        "Audio stats"
                    );
                }
            }
        }
    }

    tracing::info!("Shutting down");
    tracing::info!(summary = %serde_json::to_string(&session.stats())?, "Final video stats");
    if let Some(mut camera) = pool_camera {
        camera.stop();
    }
    inbound.stop();
    audio.close();
    session.close();
    Ok(())
}
