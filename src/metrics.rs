use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

static SESSIONS_STARTED: OnceCell<IntCounter> = OnceCell::new();
static SESSIONS_ACTIVE: OnceCell<IntGauge> = OnceCell::new();
static CONTROL_COMMANDS: OnceCell<IntCounterVec> = OnceCell::new();
static STREAMER_EVENTS: OnceCell<IntGauge> = OnceCell::new();
static STREAMER_RESYNCS: OnceCell<IntGauge> = OnceCell::new();
static STREAMER_EVICTIONS: OnceCell<IntGauge> = OnceCell::new();

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();

        let started = IntCounter::with_opts(Opts::new(
            "vstream_sessions_started_total",
            "Total visual streaming sessions started",
        ))
        .expect("create sessions counter");
        register(registry, Box::new(started.clone()));
        let _ = SESSIONS_STARTED.set(started);

        let active = IntGauge::with_opts(Opts::new(
            "vstream_sessions_active",
            "Currently registered visual streaming sessions",
        ))
        .expect("create active gauge");
        register(registry, Box::new(active.clone()));
        let _ = SESSIONS_ACTIVE.set(active);

        let commands = IntCounterVec::new(
            Opts::new(
                "vstream_control_commands_total",
                "Control-channel commands by result",
            ),
            &["result"],
        )
        .expect("create control counter");
        register(registry, Box::new(commands.clone()));
        let _ = CONTROL_COMMANDS.set(commands);

        let events = IntGauge::with_opts(Opts::new(
            "vstream_streamer_events_ingested_total",
            "Recorder events ingested across all sessions",
        ))
        .expect("create events gauge");
        register(registry, Box::new(events.clone()));
        let _ = STREAMER_EVENTS.set(events);

        let resyncs = IntGauge::with_opts(Opts::new(
            "vstream_streamer_resyncs_total",
            "Slow-client snapshot resyncs across all sessions",
        ))
        .expect("create resync gauge");
        register(registry, Box::new(resyncs.clone()));
        let _ = STREAMER_RESYNCS.set(resyncs);

        let evictions = IntGauge::with_opts(Opts::new(
            "vstream_streamer_clients_evicted_total",
            "Stream clients evicted across all sessions",
        ))
        .expect("create eviction gauge");
        register(registry, Box::new(evictions.clone()));
        let _ = STREAMER_EVICTIONS.set(evictions);
    });
}

fn register(registry: &Registry, collector: Box<dyn prometheus::core::Collector>) {
    if let Err(err) = registry.register(collector) {
        error!(?err, "failed to register metrics collector");
    }
}

pub fn record_session_started() {
    if let Some(counter) = SESSIONS_STARTED.get() {
        counter.inc();
    }
}

pub fn set_sessions_active(count: i64) {
    if let Some(gauge) = SESSIONS_ACTIVE.get() {
        gauge.set(count);
    }
}

pub fn record_control_command(result: &str) {
    if let Some(counter) = CONTROL_COMMANDS.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Render the exposition text, folding in the streamer crate's counters.
pub fn render() -> String {
    let snapshot = vstream_streamer::metrics::snapshot();
    if let Some(gauge) = STREAMER_EVENTS.get() {
        gauge.set(snapshot.events_ingested as i64);
    }
    if let Some(gauge) = STREAMER_RESYNCS.get() {
        gauge.set(snapshot.resyncs as i64);
    }
    if let Some(gauge) = STREAMER_EVICTIONS.get() {
        gauge.set(snapshot.clients_evicted as i64);
    }

    let metric_families = global_registry().gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(?err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_metrics() {
        register_metrics();
        record_session_started();
        record_control_command("ack");
        let text = render();
        assert!(text.contains("vstream_sessions_started_total"));
        assert!(text.contains("vstream_control_commands_total"));
    }
}
