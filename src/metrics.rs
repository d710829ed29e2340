use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe every series.
    pub fn init() -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        describe_all();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metric descriptions (so series show up on /metrics with help text).
pub fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_fetch_total", "Feed fetch attempts (one per tick).");
        describe_counter!("feed_fetch_errors_total", "Feed fetches that failed.");
        describe_counter!("feed_entries_total", "Entries parsed from the feed.");
        describe_counter!(
            "feed_items_malformed_total",
            "Feed items skipped because they did not deserialize."
        );
        describe_counter!("feed_matched_total", "Entries matching the keyword set.");
        describe_counter!(
            "feed_dedup_total",
            "Matching entries suppressed as already notified."
        );
        describe_counter!("notify_dispatched_total", "Entries handed to the dispatcher successfully.");
        describe_counter!("notify_errors_total", "Dispatch calls that failed or timed out.");
        describe_counter!(
            "seen_over_capacity_total",
            "Eviction passes that left the seen registry above its soft cap."
        );
        describe_gauge!("seen_registry_size", "Ids currently held by the seen registry.");
        describe_gauge!("scheduler_last_tick_ts", "Unix ts when the last tick started.");
        describe_histogram!("feed_fetch_ms", "Feed fetch + parse time in milliseconds.");
    });
}
