//! Viewer-side demo
//!
//! Reassembles video frames from the sender and streams sequenced audio
//! back to it.
//!
//! Usage: `receiver [config.toml]`

use anyhow::{Context, Result};
use bytes::BytesMut;
use crossbeam_channel::bounded;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_transfer::{
    config::AppConfig,
    network::{create_socket, AudioPrefix, Datagram, UdpReceiver, UdpTransport},
    transfer::{Reassembler, Transport},
};

/// JPEG start/end markers, as produced by the camera
fn looks_like_jpeg(frame: &[u8]) -> bool {
    frame.starts_with(&[0xFF, 0xD8]) && frame.ends_with(&[0xFF, 0xD9])
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

    tracing::info!("Starting media receiver");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&PathBuf::from(path))?,
        None => AppConfig::load_or_default()?,
    };
    config.validate()?;

    let net = &config.network;
    let video_bind: SocketAddr = format!("{}:{}", net.bind_address, net.video_port)
        .parse()
        .context("invalid bind address")?;
    let audio_remote: SocketAddr = format!("{}:{}", net.remote, net.audio_port)
        .parse()
        .context("invalid remote address")?;
    let any: SocketAddr = format!("{}:0", net.bind_address)
        .parse()
        .context("invalid bind address")?;

    let (video_tx, video_rx) = bounded::<Datagram>(4096);
    let mut receiver = UdpReceiver::start(create_socket(video_bind, None)?, video_tx)?;
    let mut reassembler = Reassembler::new(config.transfer.header_size, config.pool.slot_size);

    let mut uplink = UdpTransport::bind(any, audio_remote)?;
    let sequence_mode = config.audio.sequence_mode;
    let audio_frame = vec![0u8; config.audio.write_size];
    let started = Instant::now();
    let mut sequence: u16 = 0;
    let mut audio_buf = BytesMut::with_capacity(config.audio.write_size + 16);

    let mut tick = tokio::time::interval(Duration::from_millis(20));
    let mut report = tokio::time::interval(Duration::from_secs(5));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(%video_bind, %audio_remote, "Waiting for video...");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tick.tick() => {
                while let Ok(datagram) = video_rx.try_recv() {
                    match reassembler.push(&datagram.payload) {
                        Ok(Some(frame)) => {
                            if !looks_like_jpeg(&frame) {
                                tracing::debug!(len = frame.len(), "Frame without JPEG markers");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::debug!(from = %datagram.from, error = %e, "Bad video packet"),
                    }
                }

                audio_buf.clear();
                if sequence_mode {
                    AudioPrefix {
                        sequence,
                        timestamp: started.elapsed().as_micros() as u64,
                    }
                    .write_to(&mut audio_buf);
                }
                audio_buf.extend_from_slice(&audio_frame);
                if let Err(e) = uplink.send(&audio_buf) {
                    tracing::debug!(error = %e, "Audio send failed");
                }
                sequence = sequence.wrapping_add(1);
            }
            _ = report.tick() => {
                let rx = receiver.stats();
                let frames = reassembler.stats();
                tracing::info!(
                    packets = rx.packets_received,
                    bytes = rx.bytes_received,
                    dropped = rx.dropped,
                    frames = frames.frames,
                    incomplete = frames.incomplete,
                    "Receiver stats"
                );
            }
        }
    }

    tracing::info!("Shutting down");
    receiver.stop();
    tracing::info!(summary = %serde_json::to_string(&reassembler.stats())?, "Final reassembly stats");
    Ok(())
}
