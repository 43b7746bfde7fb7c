use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tidyslot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tidyslot_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "tidyslot_connections_active";

pub const CONNECTIONS_TOTAL: &str = "tidyslot_connections_total";

/// Counter: connections refused at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tidyslot_connections_rejected_total";

/// Gauge: tenants with a loaded engine.
pub const TENANTS_ACTIVE: &str = "tidyslot_tenants_active";

/// Counter: startup failures (bad tenant or identity).
pub const AUTH_FAILURES_TOTAL: &str = "tidyslot_auth_failures_total";

pub const WAL_FLUSH_DURATION_SECONDS: &str = "tidyslot_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "tidyslot_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "tidyslot_bookings_created_total";

/// Counter: creates refused by the 120 minute rule.
pub const CONFLICTS_REJECTED_TOTAL: &str = "tidyslot_conflicts_rejected_total";

/// Counter: lifecycle transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "tidyslot_transitions_total";

/// Install the Prometheus exporter on `port`. No-op without a port; a failed
/// install is logged and the server runs without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateStatus { .. } => "update_status",
        Command::UpdateProgress { .. } => "update_progress",
        Command::UpdateEvidence { .. } => "update_evidence",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectNotifications { .. } => "select_notifications",
        Command::DismissNotification { .. } => "dismiss_notification",
        Command::SelectConflicts { .. } => "select_conflicts",
    }
}
