use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vstream_core_types::util::epoch_secs;
use vstream_core_types::{EventMetadata, RecorderEvent, SessionId, WireEvent};

use crate::buffer::EventBuffer;
use crate::frames::{ServerFrame, StreamFrame};
use crate::metrics;

/// How long shutdown waits for per-client queues to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
/// Cadence of the housekeeping tick (parked-client deadlines).
const TICK_PERIOD: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct StreamerConfig {
    /// Ring capacity per session.
    pub buffer_size: usize,
    /// Per-client backpressure threshold.
    pub client_queue: usize,
    /// How long a `client_ready` without a buffered snapshot is held.
    pub snapshot_wait: Duration,
    /// Bounded ingest queue between the bridge and the session task.
    pub ingest_queue: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            client_queue: 256,
            snapshot_wait: Duration::from_secs(30),
            ingest_queue: 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct StreamerStatus {
    pub streaming_active: bool,
    pub streaming_ready: bool,
    pub events_processed: u64,
    pub events_buffered: u64,
    pub connected_clients: u64,
}

#[derive(Default)]
struct StreamerStats {
    active: AtomicBool,
    ready: AtomicBool,
    processed: AtomicU64,
    buffered: AtomicU64,
    clients: AtomicU64,
}

enum Command {
    Register {
        id: String,
        tx: mpsc::Sender<StreamFrame>,
    },
    Deregister {
        id: String,
    },
    ClientReady {
        id: String,
    },
    ResetRequest {
        id: String,
    },
    SetOrigin {
        url: String,
    },
}

/// Owning handle for one session's streamer task.
///
/// The task is the single writer over the buffer and client registry; the
/// handle only exchanges messages with it and reads shared atomics, so status
/// checks never touch the hot path.
pub struct StreamerHandle {
    session_id: SessionId,
    ingest_tx: mpsc::Sender<String>,
    cmd_tx: mpsc::Sender<Command>,
    stats: Arc<StreamerStats>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    client_queue: usize,
}

impl StreamerHandle {
    pub fn spawn(session_id: SessionId, config: StreamerConfig) -> Arc<Self> {
        let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_queue.max(1));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let stats = Arc::new(StreamerStats::default());
        stats.active.store(true, Ordering::SeqCst);
        let shutdown = CancellationToken::new();

        let task = StreamerTask {
            session_id: session_id.clone(),
            config: config.clone(),
            buffer: EventBuffer::new(config.buffer_size),
            next_seq: 0,
            clients: Vec::new(),
            origin_url: None,
            ingest_rx,
            cmd_rx,
            stats: Arc::clone(&stats),
            shutdown: shutdown.clone(),
        };
        let join = tokio::spawn(task.run());

        Arc::new(Self {
            session_id,
            ingest_tx,
            cmd_tx,
            stats,
            shutdown,
            task: Mutex::new(Some(join)),
            client_queue: config.client_queue.max(1),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Sender the recorder bridge pushes raw payloads into.
    pub fn ingest_sender(&self) -> mpsc::Sender<String> {
        self.ingest_tx.clone()
    }

    /// Register a viewer; returns its id and the frame stream to forward to
    /// the channel. No events flow until the client sends `client_ready`.
    pub async fn register_client(&self) -> (String, mpsc::Receiver<StreamFrame>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.client_queue);
        let _ = self
            .cmd_tx
            .send(Command::Register {
                id: id.clone(),
                tx,
            })
            .await;
        (id, rx)
    }

    pub async fn deregister_client(&self, id: &str) {
        let _ = self
            .cmd_tx
            .send(Command::Deregister { id: id.to_string() })
            .await;
    }

    pub async fn client_ready(&self, id: &str) {
        let _ = self
            .cmd_tx
            .send(Command::ClientReady { id: id.to_string() })
            .await;
    }

    pub async fn request_sequence_reset(&self, id: &str) {
        let _ = self
            .cmd_tx
            .send(Command::ResetRequest { id: id.to_string() })
            .await;
    }

    /// Record the origin stamped into subsequent event metadata.
    pub async fn set_origin(&self, url: String) {
        let _ = self.cmd_tx.send(Command::SetOrigin { url }).await;
    }

    pub fn status(&self) -> StreamerStatus {
        StreamerStatus {
            streaming_active: self.stats.active.load(Ordering::SeqCst),
            streaming_ready: self.stats.ready.load(Ordering::SeqCst),
            events_processed: self.stats.processed.load(Ordering::SeqCst),
            events_buffered: self.stats.buffered.load(Ordering::SeqCst),
            connected_clients: self.stats.clients.load(Ordering::SeqCst),
        }
    }

    /// Stop the session task, giving queued client writes a bounded grace to
    /// drain, then notify every viewer with `session_expired`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(join) = self.task.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, join).await.is_err() {
                warn!(target: "streamer", session = %self.session_id, "streamer task did not drain within grace period");
            }
        }
        self.stats.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum DeliveryMode {
    /// Registered, handshake not yet received.
    Pending,
    /// `client_ready` received while no snapshot was buffered.
    AwaitingSnapshot { deadline: Instant },
    Live,
    /// Write queue overflowed; waiting to resume from the newest snapshot.
    Resync,
}

struct ClientSlot {
    id: String,
    tx: mpsc::Sender<StreamFrame>,
    acked_seq: Option<u64>,
    mode: DeliveryMode,
    dead: bool,
}

struct StreamerTask {
    session_id: SessionId,
    config: StreamerConfig,
    buffer: EventBuffer,
    next_seq: u64,
    clients: Vec<ClientSlot>,
    origin_url: Option<String>,
    ingest_rx: mpsc::Receiver<String>,
    cmd_rx: mpsc::Receiver<Command>,
    stats: Arc<StreamerStats>,
    shutdown: CancellationToken,
}

impl StreamerTask {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(TICK_PERIOD);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!(target: "streamer", session = %self.session_id, "streamer task started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                maybe_raw = self.ingest_rx.recv() => {
                    match maybe_raw {
                        Some(raw) => self.on_ingest(&raw),
                        None => break,
                    }
                }
                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.on_command(cmd),
                        None => break,
                    }
                }
                _ = tick.tick() => self.on_tick(),
            }
            self.sweep_dead();
        }

        for slot in &self.clients {
            let _ = slot
                .tx
                .try_send(StreamFrame::Control(ServerFrame::SessionExpired));
        }
        self.stats.active.store(false, Ordering::SeqCst);
        self.stats.clients.store(0, Ordering::SeqCst);
        debug!(target: "streamer", session = %self.session_id, "streamer task stopped");
    }

    fn on_ingest(&mut self, raw: &str) {
        let event = match RecorderEvent::parse(raw) {
            Ok(event) => event,
            Err(err) => {
                metrics::record_event_dropped_parse();
                warn!(target: "streamer", session = %self.session_id, %err, "dropping unparseable recorder payload");
                return;
            }
        };

        let sequence_id = self.next_seq;
        self.next_seq += 1;
        let is_snapshot = event.is_full_snapshot();
        let wire = Arc::new(WireEvent {
            session_id: self.session_id.clone(),
            timestamp: epoch_secs(),
            event,
            sequence_id,
            metadata: EventMetadata {
                origin_url: self.origin_url.clone(),
                is_snapshot: is_snapshot.then_some(true),
            },
        });

        self.buffer.push(Arc::clone(&wire));
        metrics::record_event_ingested();
        self.stats.processed.fetch_add(1, Ordering::SeqCst);
        self.stats
            .buffered
            .store(self.buffer.len() as u64, Ordering::SeqCst);
        if self.buffer.snapshot_seq().is_some() {
            self.stats.ready.store(true, Ordering::SeqCst);
        }

        for idx in 0..self.clients.len() {
            self.deliver(idx, &wire, is_snapshot);
        }
    }

    fn deliver(&mut self, idx: usize, wire: &Arc<WireEvent>, is_snapshot: bool) {
        let mode = self.clients[idx].mode;
        match mode {
            DeliveryMode::Pending => {}
            DeliveryMode::Live => {
                let slot = &mut self.clients[idx];
                match slot.tx.try_send(StreamFrame::Event(Arc::clone(wire))) {
                    Ok(()) => slot.acked_seq = Some(wire.sequence_id),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        metrics::record_resync();
                        warn!(
                            target: "streamer",
                            session = %self.session_id,
                            client = %slot.id,
                            stalled_at = ?slot.acked_seq,
                            "client write queue full; scheduling snapshot resync"
                        );
                        slot.mode = DeliveryMode::Resync;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => slot.dead = true,
                }
            }
            DeliveryMode::AwaitingSnapshot { .. } => {
                if is_snapshot {
                    let slot = &mut self.clients[idx];
                    match slot.tx.try_send(StreamFrame::Event(Arc::clone(wire))) {
                        Ok(()) => {
                            slot.acked_seq = Some(wire.sequence_id);
                            slot.mode = DeliveryMode::Live;
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            slot.mode = DeliveryMode::Resync;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => slot.dead = true,
                    }
                }
            }
            DeliveryMode::Resync => {
                self.attempt_resync(idx);
            }
        }
    }

    /// Drop everything the slow client has missed and restart it from the
    /// newest buffered snapshot: a `sequence_reset` frame with the new base,
    /// then the snapshot-anchored suffix. Partial progress is abandoned on a
    /// full queue and retried on the next enqueue.
    fn attempt_resync(&mut self, idx: usize) -> bool {
        let Some(base) = self.buffer.snapshot_seq() else {
            return false;
        };
        {
            let slot = &mut self.clients[idx];
            match slot
                .tx
                .try_send(StreamFrame::Control(ServerFrame::SequenceReset { base }))
            {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    slot.dead = true;
                    return false;
                }
                Err(mpsc::error::TrySendError::Full(_)) => return false,
            }
        }

        let suffix: Vec<Arc<WireEvent>> = self.buffer.suffix_from(base).cloned().collect();
        let slot = &mut self.clients[idx];
        for event in suffix {
            let seq = event.sequence_id;
            match slot.tx.try_send(StreamFrame::Event(event)) {
                Ok(()) => slot.acked_seq = Some(seq),
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    slot.dead = true;
                    return false;
                }
                Err(mpsc::error::TrySendError::Full(_)) => return false,
            }
        }
        slot.mode = DeliveryMode::Live;
        debug!(target: "streamer", session = %self.session_id, client = %slot.id, base, "client resynced from snapshot");
        true
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register { id, tx } => {
                metrics::record_client_joined();
                info!(target: "streamer", session = %self.session_id, client = %id, "client registered");
                self.clients.push(ClientSlot {
                    id,
                    tx,
                    acked_seq: None,
                    mode: DeliveryMode::Pending,
                    dead: false,
                });
                self.stats
                    .clients
                    .store(self.clients.len() as u64, Ordering::SeqCst);
            }
            Command::Deregister { id } => {
                self.clients.retain(|slot| slot.id != id);
                self.stats
                    .clients
                    .store(self.clients.len() as u64, Ordering::SeqCst);
            }
            Command::ClientReady { id } => self.on_client_ready(&id),
            Command::ResetRequest { id } => self.on_reset_request(&id),
            Command::SetOrigin { url } => self.origin_url = Some(url),
        }
    }

    /// Replay the snapshot-anchored suffix so the first event the client sees
    /// is always a full snapshot. Without a buffered snapshot the client is
    /// parked until one arrives or the wait deadline passes.
    fn on_client_ready(&mut self, id: &str) {
        let Some(idx) = self.clients.iter().position(|slot| slot.id == id) else {
            return;
        };
        match self.buffer.snapshot_seq() {
            Some(base) => {
                let suffix: Vec<Arc<WireEvent>> = self.buffer.suffix_from(base).cloned().collect();
                let slot = &mut self.clients[idx];
                for event in suffix {
                    let seq = event.sequence_id;
                    match slot.tx.try_send(StreamFrame::Event(event)) {
                        Ok(()) => slot.acked_seq = Some(seq),
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            slot.dead = true;
                            return;
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            slot.mode = DeliveryMode::Resync;
                            return;
                        }
                    }
                }
                slot.mode = DeliveryMode::Live;
            }
            None => {
                let deadline = Instant::now() + self.config.snapshot_wait;
                self.clients[idx].mode = DeliveryMode::AwaitingSnapshot { deadline };
                debug!(target: "streamer", session = %self.session_id, client = %id, "no snapshot buffered; holding client");
            }
        }
    }

    fn on_reset_request(&mut self, id: &str) {
        let Some(idx) = self.clients.iter().position(|slot| slot.id == id) else {
            return;
        };
        if self.buffer.snapshot_seq().is_some() {
            self.clients[idx].mode = DeliveryMode::Resync;
            self.attempt_resync(idx);
        } else {
            let deadline = Instant::now() + self.config.snapshot_wait;
            self.clients[idx].mode = DeliveryMode::AwaitingSnapshot { deadline };
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        for slot in &mut self.clients {
            if let DeliveryMode::AwaitingSnapshot { deadline } = slot.mode {
                if now >= deadline {
                    warn!(
                        target: "streamer",
                        session = %self.session_id,
                        client = %slot.id,
                        "snapshot wait expired; expiring client"
                    );
                    let _ = slot
                        .tx
                        .try_send(StreamFrame::Control(ServerFrame::SessionExpired));
                    slot.dead = true;
                }
            }
        }
    }

    fn sweep_dead(&mut self) {
        let before = self.clients.len();
        self.clients.retain(|slot| !slot.dead);
        if self.clients.len() < before {
            for _ in self.clients.len()..before {
                metrics::record_client_evicted();
            }
            self.stats
                .clients
                .store(self.clients.len() as u64, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn raw(event_type: i64, ts: u64) -> String {
        json!({"type": event_type, "timestamp": ts}).to_string()
    }

    fn config(buffer: usize, queue: usize) -> StreamerConfig {
        StreamerConfig {
            buffer_size: buffer,
            client_queue: queue,
            snapshot_wait: Duration::from_secs(30),
            ingest_queue: 4096,
        }
    }

    async fn wait_processed(handle: &StreamerHandle, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.status().events_processed < n {
            if Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {n} events; status {:?}",
                    handle.status()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn pump(handle: &StreamerHandle, events: impl IntoIterator<Item = String>) {
        let tx = handle.ingest_sender();
        for payload in events {
            tx.send(payload).await.expect("ingest open");
        }
    }

    fn event_seq(frame: &StreamFrame) -> Option<u64> {
        match frame {
            StreamFrame::Event(event) => Some(event.sequence_id),
            StreamFrame::Control(_) => None,
        }
    }

    #[tokio::test]
    async fn sequence_ids_are_contiguous_from_zero() {
        let handle = StreamerHandle::spawn(SessionId::new(), config(100, 64));
        let mut payloads = vec![raw(2, 0)];
        payloads.extend((1..10).map(|ts| raw(3, ts)));
        pump(&handle, payloads).await;
        wait_processed(&handle, 10).await;

        let (id, mut rx) = handle.register_client().await;
        handle.client_ready(&id).await;

        let mut seqs = Vec::new();
        for _ in 0..10 {
            let frame = rx.recv().await.expect("frame");
            seqs.push(event_seq(&frame).expect("event frame"));
        }
        assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn late_join_replays_from_last_snapshot() {
        // 430 events with snapshots at 0 and 200; the late joiner must see
        // exactly 200..=429 in order, then live events.
        let handle = StreamerHandle::spawn(SessionId::new(), config(1000, 256));
        let payloads = (0..430).map(|i| if i == 0 || i == 200 { raw(2, i) } else { raw(3, i) });
        pump(&handle, payloads.collect::<Vec<_>>()).await;
        wait_processed(&handle, 430).await;

        let (id, mut rx) = handle.register_client().await;
        handle.client_ready(&id).await;

        let mut seqs = Vec::new();
        for _ in 0..230 {
            let frame = rx.recv().await.expect("replay frame");
            seqs.push(event_seq(&frame).expect("event frame"));
        }
        assert_eq!(seqs.first(), Some(&200));
        assert_eq!(seqs.last(), Some(&429));
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));

        // live tail
        pump(&handle, (430..500).map(|i| raw(3, i)).collect::<Vec<_>>()).await;
        for expected in 430..500u64 {
            let frame = rx.recv().await.expect("live frame");
            assert_eq!(event_seq(&frame), Some(expected));
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn first_frame_after_ready_is_full_snapshot() {
        let handle = StreamerHandle::spawn(SessionId::new(), config(100, 64));
        pump(&handle, (0..5).map(|i| raw(3, i)).collect::<Vec<_>>()).await;
        wait_processed(&handle, 5).await;

        let (id, mut rx) = handle.register_client().await;
        handle.client_ready(&id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "client must be held without snapshot");

        pump(&handle, vec![raw(2, 100)]).await;
        let frame = rx.recv().await.expect("snapshot frame");
        match frame {
            StreamFrame::Event(event) => {
                assert!(event.event.is_full_snapshot());
                assert_eq!(event.sequence_id, 5);
                assert_eq!(event.metadata.is_snapshot, Some(true));
            }
            other => panic!("expected snapshot event, got {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn held_client_expires_without_snapshot() {
        let mut cfg = config(100, 64);
        cfg.snapshot_wait = Duration::from_millis(100);
        let handle = StreamerHandle::spawn(SessionId::new(), cfg);

        let (id, mut rx) = handle.register_client().await;
        handle.client_ready(&id).await;

        tokio::time::advance(Duration::from_secs(1)).await;
        let frame = rx.recv().await.expect("expiry frame");
        match frame {
            StreamFrame::Control(ServerFrame::SessionExpired) => {}
            other => panic!("expected session_expired, got {other:?}"),
        }
        assert!(rx.recv().await.is_none(), "channel closes after expiry");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn slow_client_is_resynced_from_newest_snapshot() {
        let handle = StreamerHandle::spawn(SessionId::new(), config(100, 4));
        pump(&handle, vec![raw(2, 0)]).await;
        wait_processed(&handle, 1).await;

        // fast client drains continuously; slow client stalls
        let (fast_id, mut fast_rx) = handle.register_client().await;
        let (slow_id, mut slow_rx) = handle.register_client().await;
        handle.client_ready(&fast_id).await;
        handle.client_ready(&slow_id).await;

        let fast_seen = Arc::new(StdMutex::new(Vec::new()));
        let fast_sink = Arc::clone(&fast_seen);
        let fast_task = tokio::spawn(async move {
            while let Some(frame) = fast_rx.recv().await {
                if let StreamFrame::Event(event) = frame {
                    fast_sink.lock().unwrap().push(event.sequence_id);
                }
            }
        });

        // overflow the slow client's queue of 4, paced so the draining
        // client never falls behind
        for i in 1..=10u64 {
            pump(&handle, vec![raw(3, i)]).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_processed(&handle, 11).await;
        // new snapshot while the slow client is still stalled
        pump(&handle, vec![raw(2, 11)]).await;
        wait_processed(&handle, 12).await;

        // slow client drains its stale queue: strictly increasing prefix
        let mut stale = Vec::new();
        while let Ok(frame) = slow_rx.try_recv() {
            stale.push(event_seq(&frame).expect("stale frames are events"));
        }
        assert_eq!(stale.first(), Some(&0));
        assert!(stale.windows(2).all(|w| w[1] > w[0]));
        assert!(stale.len() <= 4);

        // next enqueue resyncs: sequence_reset{base} then the suffix
        pump(&handle, vec![raw(3, 12)]).await;
        let frame = slow_rx.recv().await.expect("reset frame");
        match frame {
            StreamFrame::Control(ServerFrame::SequenceReset { base }) => assert_eq!(base, 11),
            other => panic!("expected sequence_reset, got {other:?}"),
        }
        let first = slow_rx.recv().await.expect("snapshot after reset");
        assert_eq!(event_seq(&first), Some(11));
        let second = slow_rx.recv().await.expect("tail after reset");
        assert_eq!(event_seq(&second), Some(12));

        // the fast client observed every event in strict order
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            {
                let seen = fast_seen.lock().unwrap();
                if seen.len() == 13 {
                    assert_eq!(*seen, (0..=12).collect::<Vec<u64>>());
                    break;
                }
            }
            if Instant::now() >= deadline {
                panic!("fast client missed events: {:?}", fast_seen.lock().unwrap());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.shutdown().await;
        fast_task.abort();
    }

    #[tokio::test]
    async fn reset_request_resends_snapshot_suffix() {
        let handle = StreamerHandle::spawn(SessionId::new(), config(100, 64));
        let mut payloads = vec![raw(2, 0)];
        payloads.extend((1..4).map(|ts| raw(3, ts)));
        pump(&handle, payloads).await;
        wait_processed(&handle, 4).await;

        let (id, mut rx) = handle.register_client().await;
        handle.client_ready(&id).await;
        for expected in 0..4u64 {
            assert_eq!(event_seq(&rx.recv().await.unwrap()), Some(expected));
        }

        handle.request_sequence_reset(&id).await;
        match rx.recv().await.expect("reset frame") {
            StreamFrame::Control(ServerFrame::SequenceReset { base }) => assert_eq!(base, 0),
            other => panic!("expected sequence_reset, got {other:?}"),
        }
        for expected in 0..4u64 {
            assert_eq!(event_seq(&rx.recv().await.unwrap()), Some(expected));
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn unparseable_payloads_are_dropped() {
        let handle = StreamerHandle::spawn(SessionId::new(), config(100, 64));
        pump(&handle, vec!["not json".to_string(), "[1,2]".to_string()]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status().events_processed, 0);

        pump(&handle, vec![raw(2, 0)]).await;
        wait_processed(&handle, 1).await;
        let status = handle.status();
        assert!(status.streaming_ready);
        assert_eq!(status.events_processed, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn origin_url_is_stamped_into_metadata() {
        let handle = StreamerHandle::spawn(SessionId::new(), config(100, 64));
        handle.set_origin("https://example.com/app".to_string()).await;
        pump(&handle, vec![raw(2, 0)]).await;
        wait_processed(&handle, 1).await;

        let (id, mut rx) = handle.register_client().await;
        handle.client_ready(&id).await;
        match rx.recv().await.expect("frame") {
            StreamFrame::Event(event) => {
                assert_eq!(
                    event.metadata.origin_url.as_deref(),
                    Some("https://example.com/app")
                );
            }
            other => panic!("expected event, got {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_expires_connected_clients() {
        let handle = StreamerHandle::spawn(SessionId::new(), config(100, 64));
        pump(&handle, vec![raw(2, 0)]).await;
        wait_processed(&handle, 1).await;

        let (id, mut rx) = handle.register_client().await;
        handle.client_ready(&id).await;
        assert_eq!(event_seq(&rx.recv().await.unwrap()), Some(0));

        handle.shutdown().await;
        let mut saw_expired = false;
        while let Some(frame) = rx.recv().await {
            if matches!(frame, StreamFrame::Control(ServerFrame::SessionExpired)) {
                saw_expired = true;
            }
        }
        assert!(saw_expired);
        assert!(!handle.status().streaming_active);
    }
}
