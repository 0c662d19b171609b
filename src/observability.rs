use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Engine ──────────────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome
/// (reserved, closed, blacked_out, already_booked, rejected, error).
pub const RESERVATIONS_TOTAL: &str = "quadra_reservations_total";

/// Histogram: reserve latency in seconds, including lock wait.
pub const RESERVE_DURATION_SECONDS: &str = "quadra_reserve_duration_seconds";

/// Counter: availability queries. Labels: query (start_times, courts).
pub const AVAILABILITY_QUERIES_TOTAL: &str = "quadra_availability_queries_total";

// ── Storage ─────────────────────────────────────────────────────

/// Counter: cache reads served without touching the inner store. Labels: table.
pub const CACHE_HITS_TOTAL: &str = "quadra_cache_hits_total";

/// Counter: cache reads that went to the inner store. Labels: table.
pub const CACHE_MISSES_TOTAL: &str = "quadra_cache_misses_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "quadra_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "quadra_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the fmt subscriber, honouring `RUST_LOG`. A second call is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_disabled_without_port() {
        assert!(init_metrics(None).is_ok());
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
