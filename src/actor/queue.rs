//! Message envelope and the in-process delivery path

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::ActorError;

/// What a worker pops off its queue
#[derive(Debug)]
pub enum Envelope<M> {
    Msg(M),
    /// Tear down and terminate the worker
    Exit,
}

/// Something that can hand a message to a worker.
///
/// `post` never blocks and is the only method callable from callback
/// (interrupt-like) context. `post_blocking` and `exit` wait for queue space.
pub trait Deliver<M>: Send + Sync {
    fn post(&self, msg: M) -> Result<(), ActorError>;

    fn post_blocking(&self, msg: M) -> Result<(), ActorError>;

    /// Ask the worker to exit. Waits for queue space so the request is never lost.
    fn exit(&self) -> Result<(), ActorError>;
}

/// Create a worker queue of `depth` messages.
///
/// Useful when producers must be wired up before the worker starts; hand
/// the [`Inbox`] to [`WorkerTask::start`](super::WorkerTask::start).
pub fn queue_pair<M>(depth: usize) -> (LocalQueue<M>, Inbox<M>) {
    let (tx, rx) = bounded(depth.max(1));
    (LocalQueue { tx }, Inbox { rx })
}

/// Receiving half of a worker queue, owned by the worker thread
pub struct Inbox<M> {
    pub(super) rx: Receiver<Envelope<M>>,
}

/// Sending half of a worker's bounded queue
pub struct LocalQueue<M> {
    tx: Sender<Envelope<M>>,
}

impl<M> LocalQueue<M> {
    /// Queue depth
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }

    /// Messages currently waiting
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<M> Clone for LocalQueue<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send> Deliver<M> for LocalQueue<M> {
    fn post(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .try_send(Envelope::Msg(msg))
            .map_err(|e| match e {
                TrySendError::Full(_) => ActorError::QueueFull,
                TrySendError::Disconnected(_) => ActorError::Disconnected,
            })
    }

    fn post_blocking(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(Envelope::Msg(msg))
            .map_err(|_| ActorError::Disconnected)
    }

    fn exit(&self) -> Result<(), ActorError> {
        self.tx
            .send(Envelope::Exit)
            .map_err(|_| ActorError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_reports_full_queue() {
        let (queue, inbox) = queue_pair::<u8>(1);
        queue.post(1).unwrap();
        assert!(matches!(queue.post(2), Err(ActorError::QueueFull)));
        assert_eq!(queue.len(), 1);

        drop(inbox);
        assert!(matches!(queue.post(3), Err(ActorError::Disconnected)));
    }
}
