use std::net::SocketAddr;

// ── Transaction metrics ─────────────────────────────────────────

/// Counter: transactions committed. Labels: op.
pub const TXN_COMMITTED_TOTAL: &str = "rollcall_txn_committed_total";

/// Counter: attempts retried after a concurrency failure. Labels: op, reason.
pub const TXN_RETRIES_TOTAL: &str = "rollcall_txn_retries_total";

/// Counter: units of work that ended in an error. Labels: op, reason.
pub const TXN_ABORTED_TOTAL: &str = "rollcall_txn_aborted_total";

/// Histogram: time spent waiting for row locks, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "rollcall_lock_wait_seconds";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rollcall_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rollcall_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "rollcall_wal_compactions_total";

/// Install the fmt tracing subscriber and, if a port is given, the Prometheus
/// exporter. Safe to call more than once; later subscriber installs are ignored.
pub fn init(metrics_port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let _ = tracing_subscriber::fmt().try_init();

    let Some(port) = metrics_port else {
        return Ok(());
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
