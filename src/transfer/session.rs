//! Video transfer session
//!
//! A session owns one transfer worker. Frames reach it two ways:
//!
//! - as pool leases, by registering as the pool's `Network` consumer; the
//!   worker packetizes the slot in place and releases it when done
//! - as raw DMA nodes, through [`SessionSink`], which stages them in the
//!   node pool and wakes the worker in batches
//!
//! Either way every datagram goes out through the one [`Transport`].

use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;

use super::nodes::{NodeCounts, NodePool, RetainGuard};
use super::packet::{packet_count_for, Packetizer};
use super::transport::{send_with_retry, RetryPolicy, Transport};
use super::{TransferStats, TransferStatsSnapshot};
use crate::actor::{queue_pair, Actor, Deliver, LocalQueue, WorkerTask};
use crate::capture::{CaptureDriver, CaptureSink};
use crate::config::TransferConfig;
use crate::error::{ActorError, Result, TransferError};
use crate::frame::{ConsumerKind, FrameBufferPool, FrameLease};
use crate::sync::Completion;

/// Messages handled by the transfer worker
pub enum TransferMessage {
    /// Drain ready staging nodes to the transport
    Flush,
    /// Packetize and send a leased frame
    Frame(FrameLease),
    Stats(Completion<TransferStatsSnapshot>),
    ResetStats,
}

type Callback = Box<dyn FnOnce() + Send>;

/// Everything `open` needs
pub struct TransferSetup {
    pub config: TransferConfig,
    pub transport: Box<dyn Transport>,
    /// Capture hardware feeding the staging path; started on the worker thread
    pub driver: Option<Box<dyn CaptureDriver>>,
    /// Runs on the worker after hardware init
    pub start_cb: Option<Callback>,
    /// Runs on the worker after teardown
    pub end_cb: Option<Callback>,
    pub retain_guard: Option<RetainGuard>,
}

impl TransferSetup {
    pub fn new(config: TransferConfig, transport: impl Transport + 'static) -> Self {
        Self {
            config,
            transport: Box::new(transport),
            driver: None,
            start_cb: None,
            end_cb: None,
            retain_guard: None,
        }
    }

    pub fn with_driver(mut self, driver: impl CaptureDriver + 'static) -> Self {
        self.driver = Some(Box::new(driver));
        self
    }

    pub fn on_start(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.start_cb = Some(Box::new(f));
        self
    }

    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.end_cb = Some(Box::new(f));
        self
    }

    pub fn with_retain_guard(mut self, guard: RetainGuard) -> Self {
        self.retain_guard = Some(guard);
        self
    }
}

/// Capture-side entry point for DMA nodes
pub struct SessionSink {
    nodes: Arc<NodePool>,
    stats: Arc<TransferStats>,
    queue: LocalQueue<TransferMessage>,
    retain_guard: Option<RetainGuard>,
}

impl SessionSink {
    fn wake(&self) {
        // A full queue already holds a flush that will drain these nodes too
        if let Err(e) = self.queue.post(TransferMessage::Flush) {
            tracing::trace!(error = %e, "Flush not posted");
        }
    }

    pub fn node_counts(&self) -> NodeCounts {
        self.nodes.counts()
    }
}

impl CaptureSink for SessionSink {
    fn on_node_full(&self, data: &[u8], is_eof: bool, frame_len: usize) {
        self.stats.record_offered(1);
        if is_eof {
            self.stats.record_frame(frame_len);
        }

        let outcome = self.nodes.push(data, is_eof, frame_len);
        if outcome.staged {
            self.stats.record_pushed(1);
        }
        if outcome.lost {
            self.stats.record_lost(1);
        }
        if outcome.flush {
            self.wake();
        }
    }

    fn on_frame_end(&self) {
        let end = self.nodes.end_frame(self.retain_guard.as_ref());
        if end.discarded > 0 {
            self.stats.record_lost(end.discarded as u64);
            tracing::debug!(
                generation = end.generation,
                discarded = end.discarded,
                "Retained frame discarded"
            );
        }
        self.wake();
    }
}

struct TransferWorker {
    transport: Box<dyn Transport>,
    nodes: Arc<NodePool>,
    stats: Arc<TransferStats>,
    packetizer: Packetizer,
    header_size: usize,
    retry: RetryPolicy,
    frame_id: u8,
    scratch: BytesMut,
    driver: Option<Box<dyn CaptureDriver>>,
    sink: Arc<SessionSink>,
    start_cb: Option<Callback>,
    end_cb: Option<Callback>,
}

impl TransferWorker {
    fn drain_ready(&mut self) {
        while let Some(idx) = self.nodes.take_ready() {
            let result = self.nodes.with_node(idx, |datagram| {
                send_with_retry(self.transport.as_mut(), datagram, self.retry, &self.stats)
            });
            self.nodes.recycle(idx);
            if let Err(e) = result {
                tracing::debug!(error = %e, "Packet abandoned");
            }
        }
    }

    fn send_frame(&mut self, lease: &FrameLease) {
        let data = lease.data();
        if data.is_empty() {
            tracing::debug!(slot = lease.slot(), "Empty frame skipped");
            return;
        }

        let packets = self.packetizer.packets(self.frame_id, &data);
        let total = packets.total();
        self.stats.record_offered(total as u64);
        self.stats.record_pushed(total as u64);

        for (i, (header, payload)) in packets.enumerate() {
            self.scratch.clear();
            header.write_to(&mut self.scratch, self.header_size);
            self.scratch.extend_from_slice(payload);

            if let Err(e) =
                send_with_retry(self.transport.as_mut(), &self.scratch, self.retry, &self.stats)
            {
                let abandoned = total - i - 1;
                self.stats.record_lost(abandoned as u64);
                tracing::warn!(
                    frame_id = self.frame_id,
                    packet = i,
                    abandoned,
                    error = %e,
                    "Frame abandoned"
                );
                break;
            }
        }

        self.stats.record_frame(data.len());
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}

impl Actor for TransferWorker {
    type Message = TransferMessage;

    fn init(&mut self) -> std::result::Result<(), ActorError> {
        if let Some(driver) = self.driver.as_mut() {
            let sink: Arc<dyn CaptureSink> = self.sink.clone();
            driver
                .start(sink)
                .map_err(|e| ActorError::InitFailed(e.to_string()))?;
        }
        if let Some(cb) = self.start_cb.take() {
            cb();
        }
        Ok(())
    }

    fn handle(&mut self, msg: TransferMessage) {
        match msg {
            TransferMessage::Flush => self.drain_ready(),
            TransferMessage::Frame(lease) => self.send_frame(&lease),
            TransferMessage::Stats(done) => done.complete(self.stats.snapshot()),
            TransferMessage::ResetStats => self.stats.reset(),
        }
    }

    fn teardown(&mut self) {
        if let Some(driver) = self.driver.as_mut() {
            driver.stop();
        }
        // Whatever was staged before the driver stopped still goes out
        self.drain_ready();
        if let Some(cb) = self.end_cb.take() {
            cb();
        }
    }
}

/// An open video transfer session
pub struct TransferSession {
    pool: FrameBufferPool,
    worker: WorkerTask<TransferMessage>,
    sink: Arc<SessionSink>,
    stats: Arc<TransferStats>,
    closed: bool,
}

impl TransferSession {
    /// Open a session on `pool`.
    ///
    /// Only one session may be open per pool: a second `open` fails with
    /// [`TransferError::AlreadyOpen`]. Hardware init failures inside the
    /// worker surface here and leave nothing running.
    pub fn open(pool: &FrameBufferPool, setup: TransferSetup) -> Result<Self> {
        let TransferSetup {
            config,
            transport,
            driver,
            start_cb,
            end_cb,
            retain_guard,
        } = setup;

        config.validate()?;

        let node_header = config.node_header_len();
        let node_len = config.node_len();
        let frame_chunk = config.frame_chunk_len();

        let stats = Arc::new(TransferStats::new());
        let nodes = Arc::new(NodePool::new(
            config.node_count,
            node_len,
            node_header,
            config.drop_policy,
            config.flush_batch,
        ));
        let (queue, inbox) = queue_pair(config.queue_depth);

        let network_queue = queue.clone();
        let network_stats = stats.clone();
        let registered = pool.try_register(
            ConsumerKind::Network,
            Arc::new(move |lease: FrameLease| {
                let packets = packet_count_for(lease.len(), frame_chunk) as u64;
                if network_queue.post(TransferMessage::Frame(lease)).is_err() {
                    network_stats.record_offered(packets);
                    network_stats.record_lost(packets);
                }
            }),
        );
        if !registered {
            return Err(TransferError::AlreadyOpen.into());
        }

        let sink = Arc::new(SessionSink {
            nodes: nodes.clone(),
            stats: stats.clone(),
            queue: queue.clone(),
            retain_guard,
        });

        let worker = TransferWorker {
            transport,
            nodes,
            stats: stats.clone(),
            packetizer: Packetizer::new(frame_chunk),
            header_size: config.header_size,
            retry: RetryPolicy::new(config.max_retry, Duration::from_millis(config.retry_delay_ms)),
            frame_id: 0,
            scratch: BytesMut::with_capacity(frame_chunk + config.header_size),
            driver,
            sink: sink.clone(),
            start_cb,
            end_cb,
        };

        let worker = match WorkerTask::start("video-transfer", worker, queue, inbox) {
            Ok(worker) => worker,
            Err(e) => {
                pool.deregister(ConsumerKind::Network);
                return Err(TransferError::Worker(e).into());
            }
        };

        tracing::info!(
            send_type = ?config.send_type,
            open_type = ?config.open_type,
            policy = ?config.drop_policy,
            node_len,
            frame_chunk,
            "Transfer session open"
        );

        Ok(Self {
            pool: pool.clone(),
            worker,
            sink,
            stats,
            closed: false,
        })
    }

    /// Capture-side sink for drivers not handed to `open`
    pub fn sink(&self) -> Arc<SessionSink> {
        self.sink.clone()
    }

    /// Current counters, read directly
    pub fn stats(&self) -> TransferStatsSnapshot {
        self.stats.snapshot()
    }

    /// Counters as seen by the worker, after everything queued before this call
    pub fn query_stats(&self) -> Result<TransferStatsSnapshot> {
        Ok(self
            .worker
            .call(TransferMessage::Stats)
            .map_err(TransferError::Worker)?)
    }

    pub fn reset_stats(&self) -> Result<()> {
        self.worker
            .post(TransferMessage::ResetStats)
            .map_err(TransferError::Worker)?;
        Ok(())
    }

    /// Stop the worker and detach from the pool. Blocks until the worker has exited.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pool.deregister(ConsumerKind::Network);
        self.worker.stop();
        let stats = self.stats.snapshot();
        tracing::info!(
            total = stats.total,
            sent = stats.sent,
            lost = stats.lost,
            send_failed = stats.send_failed,
            "Transfer session closed"
        );
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{emit_frame, test_pattern};
    use crate::config::DropPolicy;
    use crate::error::{Error, ErrorKind};
    use crate::sync::Semaphore;
    use parking_lot::Mutex;
    use std::io;

    type Wire = Arc<Mutex<Vec<Vec<u8>>>>;

    fn recording() -> (Wire, impl Transport + 'static) {
        let wire: Wire = Arc::new(Mutex::new(Vec::new()));
        let sink = wire.clone();
        let transport = move |d: &[u8]| -> io::Result<usize> {
            sink.lock().push(d.to_vec());
            Ok(d.len())
        };
        (wire, transport)
    }

    fn quick_config() -> TransferConfig {
        TransferConfig {
            retry_delay_ms: 0,
            ..TransferConfig::default()
        }
    }

    #[test]
    fn test_pool_frame_is_packetized() {
        let pool = FrameBufferPool::new(3, 8192);
        let (wire, transport) = recording();
        let session = TransferSession::open(&pool, TransferSetup::new(quick_config(), transport)).unwrap();

        let frame = test_pattern(0, 3000);
        let mut writer = pool.allocate().unwrap();
        writer.write(&frame);
        writer.complete();

        let stats = session.query_stats().unwrap();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.frames, 1);

        let wire = wire.lock();
        assert_eq!(wire.len(), 3);
        assert_eq!(&wire[0][..4], &[0, 0, 0, 0]);
        assert_eq!(&wire[2][..4], &[0, 1, 3, 0]);
        let payload: Vec<u8> = wire.iter().flat_map(|d| d[4..].to_vec()).collect();
        assert_eq!(payload, frame);

        // Lease released once sent
        assert!(!pool.is_busy(ConsumerKind::Network));
    }

    #[test]
    fn test_second_open_rejected() {
        let pool = FrameBufferPool::new(2, 1024);
        let (_, t1) = recording();
        let (_, t2) = recording();
        let first = TransferSession::open(&pool, TransferSetup::new(quick_config(), t1)).unwrap();

        let err = TransferSession::open(&pool, TransferSetup::new(quick_config(), t2)).err().unwrap();
        assert!(matches!(err, Error::Transfer(TransferError::AlreadyOpen)));
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);

        first.close();
        let (_, t3) = recording();
        assert!(TransferSession::open(&pool, TransferSetup::new(quick_config(), t3)).is_ok());
    }

    #[test]
    fn test_unaligned_header_rejected_at_open() {
        let pool = FrameBufferPool::new(2, 1024);
        let (_, t) = recording();
        let config = TransferConfig {
            header_size: 5,
            ..quick_config()
        };
        let err = TransferSession::open(&pool, TransferSetup::new(config, t)).err().unwrap();
        assert!(matches!(err, Error::Transfer(TransferError::HeaderNotAligned(5))));
        assert!(!pool.is_registered(ConsumerKind::Network));
    }

    struct DeadCamera;

    impl CaptureDriver for DeadCamera {
        fn start(&mut self, _: Arc<dyn CaptureSink>) -> Result<()> {
            Err(Error::Config("sccb probe failed".into()))
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn test_driver_init_failure_fails_open() {
        let pool = FrameBufferPool::new(2, 1024);
        let (_, t) = recording();
        let started = Arc::new(Mutex::new(false));
        let flag = started.clone();
        let setup = TransferSetup::new(quick_config(), t)
            .with_driver(DeadCamera)
            .on_start(move || *flag.lock() = true);

        let err = TransferSession::open(&pool, setup).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FatalInit);
        assert!(!*started.lock());
        assert!(!pool.is_registered(ConsumerKind::Network));
    }

    #[test]
    fn test_start_and_end_callbacks() {
        let pool = FrameBufferPool::new(2, 1024);
        let (_, t) = recording();
        let events = Arc::new(Mutex::new(Vec::new()));
        let (e1, e2) = (events.clone(), events.clone());
        let setup = TransferSetup::new(quick_config(), t)
            .on_start(move || e1.lock().push("start"))
            .on_end(move || e2.lock().push("end"));

        let session = TransferSession::open(&pool, setup).unwrap();
        assert_eq!(*events.lock(), vec!["start"]);
        session.close();
        assert_eq!(*events.lock(), vec!["start", "end"]);
    }

    #[test]
    fn test_node_path_sends_staged_packets() {
        let pool = FrameBufferPool::new(2, 1024);
        let (wire, t) = recording();
        let session = TransferSession::open(&pool, TransferSetup::new(quick_config(), t)).unwrap();
        let sink = session.sink();

        let frame = test_pattern(0, 5000);
        emit_frame(sink.as_ref(), &frame, 1468);
        let stats = session.query_stats().unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.pushed, 4);
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.frame_len, 5000);
        let wire = wire.lock();
        assert_eq!(&wire[3][..4], &[0, 1, 4, 0]);
        assert_eq!(sink.node_counts().free, TransferConfig::default().node_count);
    }

    #[test]
    fn test_node_exhaustion_counts_lost_until_eof() {
        let pool = FrameBufferPool::new(2, 1024);
        let gate = Arc::new(Semaphore::new(0));
        let wire: Wire = Arc::new(Mutex::new(Vec::new()));
        let (g, w) = (gate.clone(), wire.clone());
        // Transport blocks until the test opens the gate, so nodes pile up
        let transport = move |d: &[u8]| -> io::Result<usize> {
            g.wait();
            w.lock().push(d.to_vec());
            Ok(d.len())
        };
        let config = TransferConfig {
            node_count: 2,
            flush_batch: 1,
            ..quick_config()
        };
        let session = TransferSession::open(&pool, TransferSetup::new(config, transport)).unwrap();
        let sink = session.sink();

        // The worker takes the first node and blocks in send; the second node stays ready
        sink.on_node_full(&[1; 100], false, 0);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.node_counts().ready != 0 && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }
        sink.on_node_full(&[2; 100], false, 0);
        sink.on_node_full(&[3; 100], false, 0);
        for _ in 0..4 {
            sink.on_node_full(&[4; 100], false, 0);
        }
        assert_eq!(session.stats().lost, 5);

        for _ in 0..16 {
            gate.signal();
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.node_counts().free != 2 && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }
        sink.on_node_full(&[5; 100], true, 800);
        sink.on_frame_end();
        let stats = session.query_stats().unwrap();
        assert_eq!(stats.total, 8);
        assert_eq!(stats.lost, 5);
        assert_eq!(stats.sent, 3);
    }

    #[test]
    fn test_retain_policy_sends_whole_frame_at_end() {
        let pool = FrameBufferPool::new(2, 1024);
        let (wire, t) = recording();
        let config = TransferConfig {
            drop_policy: DropPolicy::RetainFrame,
            ..quick_config()
        };
        let session = TransferSession::open(&pool, TransferSetup::new(config, t)).unwrap();
        let sink = session.sink();

        sink.on_node_full(&[1; 10], false, 0);
        sink.on_node_full(&[2; 10], true, 20);
        // Nothing is ready until the frame closes
        assert_eq!(sink.node_counts().receiving, 2);
        sink.on_frame_end();

        let stats = session.query_stats().unwrap();
        assert_eq!(stats.sent, 2);
        assert_eq!(wire.lock().len(), 2);
    }

    #[test]
    fn test_rejected_transport_abandons_frame() {
        let pool = FrameBufferPool::new(2, 8192);
        let config = TransferConfig {
            max_retry: 2,
            ..quick_config()
        };
        let transport = |d: &[u8]| -> io::Result<usize> { Ok(d.len() - 1) };
        let session = TransferSession::open(&pool, TransferSetup::new(config, transport)).unwrap();

        let mut writer = pool.allocate().unwrap();
        writer.write(&test_pattern(0, 3000));
        writer.complete();

        let stats = session.query_stats().unwrap();
        assert_eq!(stats.send_failed, 1);
        assert_eq!(stats.lost, 2);
        assert_eq!(stats.sent, 0);
        assert!(stats.loss_rate() > 0.99);
    }
}
