use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::model::PriceSource;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings committed by `create_booking`.
pub const BOOKINGS_CREATED_TOTAL: &str = "innkeep_bookings_created_total";

/// Counter: requested rooms turned away because the stay collided.
pub const BOOKING_ROOM_REJECTIONS_TOTAL: &str = "innkeep_booking_room_rejections_total";

// ── Pricing ─────────────────────────────────────────────────────

/// Counter: single-night price resolutions. Labels: source.
pub const PRICE_RESOLUTIONS_TOTAL: &str = "innkeep_price_resolutions_total";

/// Counter: rate rule writes refused by validation or the overlap check.
pub const RULE_VALIDATION_FAILURES_TOTAL: &str = "innkeep_rule_validation_failures_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "innkeep_journal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "innkeep_journal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn source_label(source: PriceSource) -> &'static str {
    match source {
        PriceSource::Seasonal => "seasonal",
        PriceSource::Base => "base",
    }
}
