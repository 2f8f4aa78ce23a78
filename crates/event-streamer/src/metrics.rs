use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamerMetricsSnapshot {
    pub events_ingested: u64,
    pub events_dropped_parse: u64,
    pub clients_joined: u64,
    pub clients_evicted: u64,
    pub resyncs: u64,
}

static EVENTS_INGESTED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DROPPED_PARSE: AtomicU64 = AtomicU64::new(0);
static CLIENTS_JOINED: AtomicU64 = AtomicU64::new(0);
static CLIENTS_EVICTED: AtomicU64 = AtomicU64::new(0);
static RESYNCS: AtomicU64 = AtomicU64::new(0);

pub fn record_event_ingested() {
    EVENTS_INGESTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_event_dropped_parse() {
    EVENTS_DROPPED_PARSE.fetch_add(1, Ordering::Relaxed);
}

pub fn record_client_joined() {
    CLIENTS_JOINED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_client_evicted() {
    CLIENTS_EVICTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_resync() {
    RESYNCS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> StreamerMetricsSnapshot {
    StreamerMetricsSnapshot {
        events_ingested: EVENTS_INGESTED.load(Ordering::Relaxed),
        events_dropped_parse: EVENTS_DROPPED_PARSE.load(Ordering::Relaxed),
        clients_joined: CLIENTS_JOINED.load(Ordering::Relaxed),
        clients_evicted: CLIENTS_EVICTED.load(Ordering::Relaxed),
        resyncs: RESYNCS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    EVENTS_INGESTED.store(0, Ordering::Relaxed);
    EVENTS_DROPPED_PARSE.store(0, Ordering::Relaxed);
    CLIENTS_JOINED.store(0, Ordering::Relaxed);
    CLIENTS_EVICTED.store(0, Ordering::Relaxed);
    RESYNCS.store(0, Ordering::Relaxed);
}
