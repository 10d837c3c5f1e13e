//! Transport boundary and the retrying send

use std::io;
use std::time::Duration;

use super::TransferStats;
use crate::error::TransferError;

/// Datagram sink supplied by the socket or mailbox layer.
///
/// `send` must not block and may accept fewer bytes than offered.
pub trait Transport: Send {
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize>;
}

impl<F> Transport for F
where
    F: FnMut(&[u8]) -> io::Result<usize> + Send,
{
    fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        self(datagram)
    }
}

/// Retry policy for one datagram
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Send one datagram, retrying on short counts and errors.
///
/// Succeeds only when the transport takes the exact length. Counts `sent`
/// or `send_failed` in `stats`.
pub fn send_with_retry<T: Transport + ?Sized>(
    transport: &mut T,
    datagram: &[u8],
    policy: RetryPolicy,
    stats: &TransferStats,
) -> Result<(), TransferError> {
    let mut accepted = 0;

    for attempt in 1..=policy.max_attempts {
        match transport.send(datagram) {
            Ok(n) if n == datagram.len() => {
                stats.record_sent();
                return Ok(());
            }
            Ok(n) => {
                accepted = n;
                tracing::trace!(attempt, sent = n, expected = datagram.len(), "Short send");
            }
            Err(e) => {
                accepted = 0;
                tracing::trace!(attempt, error = %e, "Send error");
            }
        }
        if attempt < policy.max_attempts && !policy.delay.is_zero() {
            std::thread::sleep(policy.delay);
        }
    }

    stats.record_send_failed();
    Err(TransferError::TransportRejected {
        expected: datagram.len(),
        sent: accepted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_short_sends() {
        let stats = TransferStats::new();
        let mut calls = 0;
        let mut transport = |d: &[u8]| -> io::Result<usize> {
            calls += 1;
            Ok(if calls < 3 { d.len() / 2 } else { d.len() })
        };
        let policy = RetryPolicy::new(4, Duration::ZERO);

        send_with_retry(&mut transport, b"0123", policy, &stats).unwrap();
        assert_eq!(calls, 3);
        let snap = stats.snapshot();
        assert_eq!(snap.sent, 1);
        assert_eq!(snap.send_failed, 0);
    }

    #[test]
    fn test_gives_up_after_budget() {
        let stats = TransferStats::new();
        let mut calls = 0u32;
        let mut transport = |_: &[u8]| -> io::Result<usize> {
            calls += 1;
            Err(io::Error::new(io::ErrorKind::WouldBlock, "busy"))
        };
        let policy = RetryPolicy::new(4, Duration::from_millis(1));

        let err = send_with_retry(&mut transport, b"abc", policy, &stats).unwrap_err();
        assert!(matches!(
            err,
            TransferError::TransportRejected { expected: 3, sent: 0 }
        ));
        assert_eq!(calls, 4);
        assert_eq!(stats.snapshot().send_failed, 1);
    }
}
