use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "campo_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "campo_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: bookings confirmed.
pub const BOOKINGS_CREATED_TOTAL: &str = "campo_bookings_created_total";

/// Counter: bookings cancelled, by the booker or by a closure.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "campo_bookings_cancelled_total";

/// Counter: reservations refused because a confirmed booking holds the slot.
pub const BOOKING_CONFLICTS_TOTAL: &str = "campo_booking_conflicts_total";

/// Counter: calendar days written by horizon extension or schedule edits.
pub const DAYS_PROJECTED_TOTAL: &str = "campo_days_projected_total";

/// Counter: price previews served from the rule-set cache.
pub const PRICING_CACHE_HITS_TOTAL: &str = "campo_pricing_cache_hits_total";

/// Counter: price previews that had to load the rule set.
pub const PRICING_CACHE_MISSES_TOTAL: &str = "campo_pricing_cache_misses_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "campo_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "campo_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "campo_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "campo_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "campo_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "campo_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "campo_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
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
        Command::InsertResource { .. } => "insert_resource",
        Command::DeleteResource { .. } => "delete_resource",
        Command::SelectResources => "select_resources",
        Command::InsertSchedule { .. } => "insert_schedule",
        Command::InsertPricing { .. } => "insert_pricing",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::InsertClosure { .. } => "insert_closure",
        Command::DeleteClosure { .. } => "delete_closure",
        Command::InsertSlotState { .. } => "insert_slot_state",
        Command::SelectPrice { .. } => "select_price",
        Command::SelectPricingErrors { .. } => "select_pricing_errors",
    }
}
