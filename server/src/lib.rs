//! motiond - motion-controller telemetry server.
//!
//! Streams controller telemetry to many clients over a shared UDP socket
//! while answering request/response traffic on per-client TCP streams. A
//! single cooperative event loop drives every session; datagram endpoints
//! are paired to stream sessions through a connection-id handshake.

pub mod banner;
pub mod config;
pub mod driver;
pub mod logging;
pub mod metrics;
pub mod pairing;
pub mod registry;
pub mod service;
pub mod session;
pub mod signal;

pub use config::Config;
pub use driver::NetworkCore;
pub use service::{MotionService, RequestHandler};
pub use session::ConnectionId;
