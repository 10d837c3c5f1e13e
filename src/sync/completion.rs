//! One-shot request/result slot for synchronous calls into a worker.
//!
//! The caller keeps the [`CompletionWaiter`] and ships the [`Completion`]
//! inside the message. The worker answers exactly once by consuming the
//! completion; if the message is dropped unanswered (queue torn down, worker
//! exited) the waiter still wakes, with [`ActorError::Abandoned`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::Semaphore;
use crate::error::ActorError;

struct Shared<T> {
    result: Mutex<Option<Result<T, ActorError>>>,
    ready: Semaphore,
}

/// Worker side of a synchronous call
pub struct Completion<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// Caller side of a synchronous call
pub struct CompletionWaiter<T> {
    shared: Arc<Shared<T>>,
}

/// Create a linked completion pair. The semaphore starts at zero.
pub fn completion<T>() -> (Completion<T>, CompletionWaiter<T>) {
    let shared = Arc::new(Shared {
        result: Mutex::new(None),
        ready: Semaphore::new(0),
    });
    (
        Completion {
            shared: Some(shared.clone()),
        },
        CompletionWaiter { shared },
    )
}

impl<T> Completion<T> {
    /// Store the result and wake the caller
    pub fn complete(mut self, value: T) {
        self.finish(Ok(value));
    }

    /// Report failure to the caller
    pub fn fail(mut self, err: ActorError) {
        self.finish(Err(err));
    }

    fn finish(&mut self, result: Result<T, ActorError>) {
        if let Some(shared) = self.shared.take() {
            *shared.result.lock() = Some(result);
            shared.ready.signal();
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.finish(Err(ActorError::Abandoned));
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.shared.is_some())
            .finish()
    }
}

impl<T> CompletionWaiter<T> {
    /// Block until the worker answers
    pub fn wait(self) -> Result<T, ActorError> {
        self.shared.ready.wait();
        self.take()
    }

    /// Block up to `timeout`; `None` if the worker has not answered yet
    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<T, ActorError>> {
        if self.shared.ready.wait_timeout(timeout) {
            Some(self.take())
        } else {
            None
        }
    }

    fn take(&self) -> Result<T, ActorError> {
        self.shared
            .result
            .lock()
            .take()
            .unwrap_or(Err(ActorError::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_value_forwarded() {
        let (done, waiter) = completion::<u32>();
        let handle = thread::spawn(move || done.complete(42));
        assert_eq!(waiter.wait().unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_drop_wakes_waiter() {
        let (done, waiter) = completion::<()>();
        drop(done);
        assert!(matches!(waiter.wait(), Err(ActorError::Abandoned)));
    }

    #[test]
    fn test_failure_forwarded() {
        let (done, waiter) = completion::<()>();
        done.fail(ActorError::InitFailed("camera".into()));
        match waiter.wait() {
            Err(ActorError::InitFailed(msg)) => assert_eq!(msg, "camera"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_timeout_without_answer() {
        let (_done, waiter) = completion::<()>();
        assert!(waiter.wait_timeout(Duration::from_millis(10)).is_none());
    }
}
