//! Metric helpers for the bridge.
//!
//! This module defines metric names and thin helpers wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled the helpers compile to nothing. No exporter is installed here;
//! the embedding broker chooses one.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "amqp_bridge_connections_active";
/// Name of the counter tracking deliveries moved across the bridge.
pub const DELIVERIES_TOTAL: &str = "amqp_bridge_deliveries_total";
/// Name of the counter tracking connection-fatal errors.
pub const ERRORS_TOTAL: &str = "amqp_bridge_errors_total";

/// Direction of a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// From a client producer into the broker.
    Inbound,
    /// From the broker out to a client consumer.
    Outbound,
}

impl Direction {
    /// Label value used for this direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a delivery in the given direction.
pub fn inc_deliveries(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(DELIVERIES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a connection-fatal error.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}
