//! Worker thread lifecycle

use std::thread::{self, JoinHandle};

use super::queue::{queue_pair, Deliver, Envelope, Inbox, LocalQueue};
use crate::error::ActorError;
use crate::sync::{completion, Completion};

/// A subsystem that runs on its own worker thread
pub trait Actor: Send + 'static {
    type Message: Send + 'static;

    /// One-time hardware bring-up, run on the worker thread before the first message.
    /// An error here fails the spawn; no partially-started worker is left behind.
    fn init(&mut self) -> Result<(), ActorError> {
        Ok(())
    }

    fn handle(&mut self, msg: Self::Message);

    /// Release hardware after `Exit`
    fn teardown(&mut self) {}
}

/// Handle to a running worker thread
pub struct WorkerTask<M: Send + 'static> {
    name: String,
    queue: LocalQueue<M>,
    handle: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> WorkerTask<M> {
    /// Start `actor` on a named thread with a queue of `depth` messages.
    ///
    /// Blocks until the actor's `init` has run and forwards its error.
    pub fn spawn<A>(name: &str, actor: A, depth: usize) -> Result<Self, ActorError>
    where
        A: Actor<Message = M>,
    {
        let (queue, inbox) = queue_pair(depth);
        Self::start(name, actor, queue, inbox)
    }

    /// Start `actor` on a queue created earlier with [`queue_pair`]
    pub fn start<A>(
        name: &str,
        actor: A,
        queue: LocalQueue<M>,
        inbox: Inbox<M>,
    ) -> Result<Self, ActorError>
    where
        A: Actor<Message = M>,
    {
        let depth = queue.capacity();
        let (init_done, init_wait) = completion::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(actor, inbox, init_done))
            .map_err(|e| ActorError::SpawnFailed(e.to_string()))?;

        if let Err(e) = init_wait.wait() {
            let _ = handle.join();
            tracing::error!(worker = name, error = %e, "Worker failed to start");
            return Err(e);
        }

        tracing::debug!(worker = name, depth, "Worker started");

        Ok(Self {
            name: name.to_string(),
            queue,
            handle: Some(handle),
        })
    }

    /// A cloneable sender for this worker's queue
    pub fn queue(&self) -> LocalQueue<M> {
        self.queue.clone()
    }

    /// Non-blocking post
    pub fn post(&self, msg: M) -> Result<(), ActorError> {
        self.queue.post(msg)
    }

    /// Synchronous call: see [`call`]
    pub fn call<R>(&self, make: impl FnOnce(Completion<R>) -> M) -> Result<R, ActorError> {
        call(&self.queue, make)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Send `Exit` and wait for the thread to terminate
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Disconnected means the worker is already gone
            let _ = self.queue.exit();
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "Worker panicked");
            }
            tracing::debug!(worker = %self.name, "Worker stopped");
        }
    }
}

impl<M: Send + 'static> Drop for WorkerTask<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Send a message carrying a [`Completion`] and block until the worker answers.
///
/// The worker's result is returned verbatim. If the worker drops the message
/// without answering, the caller gets [`ActorError::Abandoned`].
pub fn call<M, R, D>(dest: &D, make: impl FnOnce(Completion<R>) -> M) -> Result<R, ActorError>
where
    D: Deliver<M> + ?Sized,
{
    let (done, waiter) = completion();
    dest.post_blocking(make(done))?;
    waiter.wait()
}

fn run<A: Actor>(mut actor: A, inbox: Inbox<A::Message>, init_done: Completion<()>) {
    if let Err(e) = actor.init() {
        init_done.fail(e);
        return;
    }
    init_done.complete(());

    loop {
        match inbox.rx.recv() {
            Ok(Envelope::Msg(msg)) => actor.handle(msg),
            Ok(Envelope::Exit) => break,
            // Every sender is gone: nobody can reach us again
            Err(_) => break,
        }
    }

    actor.teardown();
    // Queue is freed here, by its owner
    drop(inbox);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    enum CounterMsg {
        Add(u32),
        Get(Completion<u32>),
    }

    struct Counter {
        total: u32,
        torn_down: Arc<AtomicBool>,
    }

    impl Actor for Counter {
        type Message = CounterMsg;

        fn handle(&mut self, msg: CounterMsg) {
            match msg {
                CounterMsg::Add(n) => self.total += n,
                CounterMsg::Get(done) => done.complete(self.total),
            }
        }

        fn teardown(&mut self) {
            self.torn_down.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_call_returns_worker_result() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let mut worker = WorkerTask::spawn(
            "counter",
            Counter {
                total: 0,
                torn_down: torn_down.clone(),
            },
            8,
        )
        .unwrap();

        worker.post(CounterMsg::Add(3)).unwrap();
        worker.post(CounterMsg::Add(4)).unwrap();
        assert_eq!(worker.call(CounterMsg::Get).unwrap(), 7);

        worker.stop();
        assert!(torn_down.load(Ordering::SeqCst));
        assert!(!worker.is_running());
    }

    struct BrokenCamera;

    impl Actor for BrokenCamera {
        type Message = ();

        fn init(&mut self) -> Result<(), ActorError> {
            Err(ActorError::InitFailed("sensor not detected".into()))
        }

        fn handle(&mut self, _: ()) {}
    }

    #[test]
    fn test_init_failure_surfaces_from_spawn() {
        let err = WorkerTask::spawn("camera", BrokenCamera, 4).err().unwrap();
        assert!(matches!(err, ActorError::InitFailed(_)));
    }

    struct Slow {
        handled: Arc<AtomicU32>,
    }

    impl Actor for Slow {
        type Message = ();

        fn handle(&mut self, _: ()) {
            std::thread::sleep(std::time::Duration::from_millis(1));
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_exit_is_queued_behind_pending_messages() {
        let handled = Arc::new(AtomicU32::new(0));
        let mut worker = WorkerTask::spawn(
            "slow",
            Slow {
                handled: handled.clone(),
            },
            2,
        )
        .unwrap();
        let queue = worker.queue();
        for _ in 0..5 {
            queue.post_blocking(()).unwrap();
        }
        worker.stop();
        assert_eq!(handled.load(Ordering::SeqCst), 5);
        assert!(matches!(queue.post(()), Err(ActorError::Disconnected)));
    }
}
