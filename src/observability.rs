use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "staygrid_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "staygrid_query_duration_seconds";

/// Counter: override rows written. Labels: kind (insert/update).
pub const OVERRIDE_WRITES_TOTAL: &str = "staygrid_override_writes_total";

/// Counter: reject-mode writes refused because of an overlapping override.
pub const OVERLAP_REJECTIONS_TOTAL: &str = "staygrid_overlap_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staygrid_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staygrid_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staygrid_connections_rejected_total";

/// Gauge: owners with at least one override loaded.
pub const OWNERS_LOADED: &str = "staygrid_owners_loaded";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staygrid_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staygrid_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertOwner { .. } => "upsert_owner",
        Command::AssignScope { .. } => "assign_scope",
        Command::UpsertReservation { .. } => "upsert_reservation",
        Command::SetAvailability { .. } => "set_availability",
        Command::UpdateOverride { .. } => "update_override",
        Command::BlockRanges { .. } => "block_date_ranges",
        Command::SetSpecialPricing { .. } => "set_special_pricing",
        Command::InitializeDefaults { .. } => "initialize_default_availability",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectPrice { .. } => "select_price",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectOverrides { .. } => "select_overrides",
        Command::Checkpoint => "checkpoint",
    }
}
