use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "staybook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "staybook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staybook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staybook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staybook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "staybook_tenants_active";

/// Counter: statements refused because the user is not the admin.
pub const AUTH_FAILURES_TOTAL: &str = "staybook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

// ── Business metrics ────────────────────────────────────────────

/// Counter: holds released by the reaper after expiring.
pub const HOLDS_REAPED_TOTAL: &str = "staybook_holds_reaped_total";

/// Counter: stays that redeemed a voucher.
pub const VOUCHER_REDEMPTIONS_TOTAL: &str = "staybook_voucher_redemptions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("failed to install Prometheus exporter on port {port}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertHomestay { .. } => "insert_homestay",
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteListing { .. } => "delete_listing",
        Command::InsertRule { .. } => "insert_rule",
        Command::DeleteRule { .. } => "delete_rule",
        Command::InsertHold { .. } => "insert_hold",
        Command::DeleteHold { .. } => "delete_hold",
        Command::ConfirmHold { .. } => "confirm_hold",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::InsertVoucher { .. } => "insert_voucher",
        Command::DeleteVoucher { .. } => "delete_voucher",
        Command::UpdateSettings { .. } => "update_settings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectHomestayAvailability { .. } => "select_homestay_availability",
        Command::SelectVacancies { .. } => "select_vacancies",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectHomestays { .. } => "select_homestays",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectRules { .. } => "select_rules",
        Command::SelectHolds { .. } => "select_holds",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectVouchers => "select_vouchers",
        Command::SelectSettings => "select_settings",
        Command::SelectRevenue { .. } => "select_revenue",
    }
}
