//! io-reactor - readiness-based TCP/UDP reactor over mio.
//!
//! A single-threaded event loop primitive: register listeners, stream
//! connections, and datagram sockets, then drive everything with a
//! poll/drain cycle. Readiness events surface as [`Completion`] values and
//! all actual I/O happens through nonblocking calls on the reactor.
//!
//! # Quick Start
//!
//! ```ignore
//! use io_reactor::{Completion, Reactor};
//! use std::time::Duration;
//!
//! let mut reactor = Reactor::new()?;
//! let listener = reactor.listen("0.0.0.0:9512".parse()?, 128)?;
//!
//! loop {
//!     reactor.poll(Some(Duration::from_millis(1)))?;
//!
//!     for completion in reactor.drain_completions() {
//!         match completion {
//!             Completion::Accept { conn_id, addr, .. } => {
//!                 println!("new connection from {}", addr);
//!             }
//!             Completion::Recv { conn_id } => {
//!                 let mut buf = [0u8; 4096];
//!                 if let Ok(n) = reactor.recv(conn_id, &mut buf) {
//!                     reactor.send(conn_id, &buf[..n])?;
//!                 }
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```
//!
//! Readable/writable state is tracked per socket and cleared whenever a call
//! reports `WouldBlock`; the next poll re-arms it. This matches mio's
//! edge-style delivery on epoll and kqueue.

mod reactor;
mod types;

pub use reactor::Reactor;
pub use types::{Completion, ConnId, ListenerId, UdpSocketId};
