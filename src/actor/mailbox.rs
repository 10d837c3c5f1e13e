//! Cross-core delivery through a fixed-width mailbox.
//!
//! Messages are marshalled into a four-word [`MailboxFrame`] by a
//! [`MailboxCodec`]. On the receiving side an interrupt handler thread
//! unpacks each frame and reposts the equivalent message to the worker's
//! [`LocalQueue`], so the worker never knows which path delivered it.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use super::queue::{Deliver, LocalQueue};
use crate::error::ActorError;

/// Command word reserved for worker exit
pub const MAILBOX_CMD_EXIT: u32 = 0xFFFF_FFFF;

/// One hardware mailbox transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxFrame {
    pub cmd: u32,
    pub param1: u32,
    pub param2: u32,
    pub param3: u32,
}

impl MailboxFrame {
    pub fn new(cmd: u32) -> Self {
        Self {
            cmd,
            ..Default::default()
        }
    }

    pub fn with_param(cmd: u32, param1: u32) -> Self {
        Self {
            cmd,
            param1,
            ..Default::default()
        }
    }
}

/// Converts a worker's messages to and from mailbox frames.
///
/// `encode` fails with [`ActorError::NotMarshallable`] for messages that only
/// make sense in-process (ones carrying a completion, for instance).
pub trait MailboxCodec: Send + Sync + 'static {
    type Message: Send + 'static;

    fn encode(&self, msg: Self::Message) -> Result<MailboxFrame, ActorError>;

    fn decode(&self, frame: MailboxFrame) -> Result<Self::Message, ActorError>;
}

/// Sending side of a mailbox link. Cloneable; the receive-side handler
/// thread exits once every clone has been dropped.
pub struct MailboxChannel<C: MailboxCodec> {
    codec: Arc<C>,
    tx: Sender<MailboxFrame>,
    stats: Arc<MailboxStats>,
}

#[derive(Debug, Default)]
struct MailboxStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl<C: MailboxCodec> MailboxChannel<C> {
    /// Open a mailbox of `depth` frames whose far end reposts into `local`
    pub fn open(codec: C, local: LocalQueue<C::Message>, depth: usize) -> Result<Self, ActorError> {
        let codec = Arc::new(codec);
        let stats = Arc::new(MailboxStats::default());
        let (tx, rx) = bounded::<MailboxFrame>(depth.max(1));

        let isr_codec = codec.clone();
        let isr_stats = stats.clone();
        thread::Builder::new()
            .name("mailbox-isr".into())
            .spawn(move || isr_loop(isr_codec.as_ref(), rx, local, &isr_stats))
            .map_err(|e| ActorError::SpawnFailed(e.to_string()))?;

        Ok(Self { codec, tx, stats })
    }

    /// Frames reposted to the local queue
    pub fn delivered(&self) -> u64 {
        self.stats.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped on the receiving core (undecodable or queue full)
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}

impl<C: MailboxCodec> Clone for MailboxChannel<C> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            tx: self.tx.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<C: MailboxCodec> Deliver<C::Message> for MailboxChannel<C> {
    fn post(&self, msg: C::Message) -> Result<(), ActorError> {
        let frame = self.codec.encode(msg)?;
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ActorError::QueueFull,
            TrySendError::Disconnected(_) => ActorError::Disconnected,
        })
    }

    fn post_blocking(&self, msg: C::Message) -> Result<(), ActorError> {
        let frame = self.codec.encode(msg)?;
        self.tx.send(frame).map_err(|_| ActorError::Disconnected)
    }

    fn exit(&self) -> Result<(), ActorError> {
        self.tx
            .send(MailboxFrame::new(MAILBOX_CMD_EXIT))
            .map_err(|_| ActorError::Disconnected)
    }
}

fn isr_loop<C: MailboxCodec>(
    codec: &C,
    rx: Receiver<MailboxFrame>,
    local: LocalQueue<C::Message>,
    stats: &MailboxStats,
) {
    while let Ok(frame) = rx.recv() {
        let result = if frame.cmd == MAILBOX_CMD_EXIT {
            local.exit()
        } else {
            codec.decode(frame).and_then(|msg| local.post(msg))
        };

        match result {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(cmd = frame.cmd, error = %e, "Mailbox frame dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, WorkerTask};
    use crate::sync::Semaphore;

    #[derive(Debug, PartialEq)]
    enum Ping {
        Value(u32),
        Pair(u32, u32),
    }

    struct PingCodec;

    impl MailboxCodec for PingCodec {
        type Message = Ping;

        fn encode(&self, msg: Ping) -> Result<MailboxFrame, ActorError> {
            Ok(match msg {
                Ping::Value(v) => MailboxFrame::with_param(1, v),
                Ping::Pair(a, b) => MailboxFrame {
                    cmd: 2,
                    param1: a,
                    param2: b,
                    param3: 0,
                },
            })
        }

        fn decode(&self, frame: MailboxFrame) -> Result<Ping, ActorError> {
            match frame.cmd {
                1 => Ok(Ping::Value(frame.param1)),
                2 => Ok(Ping::Pair(frame.param1, frame.param2)),
                other => Err(ActorError::BadMailboxFrame(other)),
            }
        }
    }

    struct Collector {
        seen: Arc<parking_lot::Mutex<Vec<Ping>>>,
        arrived: Arc<Semaphore>,
    }

    impl Actor for Collector {
        type Message = Ping;

        fn handle(&mut self, msg: Ping) {
            self.seen.lock().push(msg);
            self.arrived.signal();
        }
    }

    #[test]
    fn test_messages_cross_the_mailbox() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let arrived = Arc::new(Semaphore::new(0));
        let mut worker = WorkerTask::spawn(
            "collector",
            Collector {
                seen: seen.clone(),
                arrived: arrived.clone(),
            },
            8,
        )
        .unwrap();

        let mailbox = MailboxChannel::open(PingCodec, worker.queue(), 4).unwrap();
        mailbox.post(Ping::Value(7)).unwrap();
        mailbox.post_blocking(Ping::Pair(1, 2)).unwrap();

        let timeout = std::time::Duration::from_secs(5);
        assert!(arrived.wait_timeout(timeout));
        assert!(arrived.wait_timeout(timeout));
        assert_eq!(*seen.lock(), vec![Ping::Value(7), Ping::Pair(1, 2)]);
        assert_eq!(mailbox.delivered(), 2);

        // Exit travels the same path and terminates the worker
        mailbox.exit().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while worker.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(!worker.is_running());
        worker.stop();
    }
}
