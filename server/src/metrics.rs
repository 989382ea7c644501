//! Telemetry server metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "connections_accepted",
    description = "Total number of stream connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently active sessions"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "requests_dispatched",
    description = "Total requests handed to the request handler"
)]
pub static REQUESTS_DISPATCHED: Counter = Counter::new();

#[metric(
    name = "responses_sent",
    description = "Total stream payloads fully transmitted"
)]
pub static RESPONSES_SENT: Counter = Counter::new();

#[metric(
    name = "notifications_sent",
    description = "Total server-initiated notifications enqueued"
)]
pub static NOTIFICATIONS_SENT: Counter = Counter::new();

#[metric(
    name = "dataframes_sent",
    description = "Total telemetry datagrams transmitted"
)]
pub static DATAFRAMES_SENT: Counter = Counter::new();

#[metric(
    name = "dataframes_dropped",
    description = "Telemetry frames dropped (oversized or queue overflow)"
)]
pub static DATAFRAMES_DROPPED: Counter = Counter::new();

#[metric(
    name = "pairings_accepted",
    description = "Datagram pairing handshakes accepted"
)]
pub static PAIRINGS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "pairings_rejected",
    description = "Datagram pairing handshakes rejected (unknown id)"
)]
pub static PAIRINGS_REJECTED: Counter = Counter::new();

#[metric(
    name = "protocol_errors",
    description = "Total framing and parse errors on the stream transport"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();
