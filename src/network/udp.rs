//! UDP sockets: the video/audio transport and a receive thread

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::transfer::Transport;

const MAX_DATAGRAM: usize = 65_535;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Create a UDP socket bound to `bind`.
///
/// `send_buffer` sets `SO_SNDBUF` when given.
pub fn create_socket(bind: SocketAddr, send_buffer: Option<usize>) -> io::Result<UdpSocket> {
    let domain = if bind.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Some(size) = send_buffer {
        socket.set_send_buffer_size(size)?;
    }
    socket.bind(&bind.into())?;
    Ok(socket.into())
}

/// Non-blocking datagram transport to one remote
pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket, remote: SocketAddr) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self { socket, remote })
    }

    /// Bind a fresh socket and target `remote`
    pub fn bind(bind: SocketAddr, remote: SocketAddr) -> io::Result<Self> {
        Self::new(create_socket(bind, None)?, remote)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        self.socket.send_to(datagram, self.remote)
    }
}

/// One received datagram
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Bytes,
    pub from: SocketAddr,
}

#[derive(Debug, Default)]
struct ReceiverCounters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    /// Datagrams discarded because the consumer fell behind
    pub dropped: u64,
}

/// Receive thread that forwards datagrams into a channel
pub struct UdpReceiver {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    counters: Arc<ReceiverCounters>,
    thread_handle: Option<JoinHandle<()>>,
}

impl UdpReceiver {
    /// Start receiving on `socket`, forwarding into `tx` without blocking
    pub fn start(socket: UdpSocket, tx: Sender<Datagram>) -> io::Result<Self> {
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(ReceiverCounters::default());

        let thread_running = running.clone();
        let thread_counters = counters.clone();
        let handle = thread::Builder::new()
            .name("udp-rx".into())
            .spawn(move || receive_loop(socket, tx, &thread_running, &thread_counters))?;

        tracing::info!(%local_addr, "UDP receiver started");
        Ok(Self {
            local_addr,
            running,
            counters,
            thread_handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(local_addr = %self.local_addr, "UDP receiver stopped");
        }
    }
}

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    tx: Sender<Datagram>,
    running: &AtomicBool,
    counters: &ReceiverCounters,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while running.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue
            }
            Err(e) => {
                tracing::warn!(error = %e, "UDP receive failed");
                continue;
            }
        };

        counters.packets_received.fetch_add(1, Ordering::Relaxed);
        counters.bytes_received.fetch_add(len as u64, Ordering::Relaxed);

        let datagram = Datagram {
            payload: Bytes::copy_from_slice(&buf[..len]),
            from,
        };
        match tx.try_send(datagram) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_transport_reaches_receiver() {
        let rx_socket = create_socket(loopback(), None).unwrap();
        let (tx, rx) = bounded(8);
        let mut receiver = UdpReceiver::start(rx_socket, tx).unwrap();

        let mut transport = UdpTransport::bind(loopback(), receiver.local_addr()).unwrap();
        assert_eq!(transport.send(b"frame").unwrap(), 5);

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(&got.payload[..], b"frame");
        assert_eq!(got.from, transport.local_addr().unwrap());
        assert_eq!(receiver.stats().packets_received, 1);
        receiver.stop();
    }
}
