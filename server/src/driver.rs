//! The event loop driver.
//!
//! [`NetworkCore`] owns the reactor, the stream acceptor, the shared
//! datagram socket, the registry, and the request handler, and advances all
//! of them from a single cooperative [`poll`](NetworkCore::poll). No locks:
//! every session is mutated only on the thread that polls.
//!
//! Errors never escape `poll()`. Anything fatal to one client stops that
//! session; the rest of the server keeps running.

use crate::config::Config;
use crate::metrics::{CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE, NOTIFICATIONS_SENT};
use crate::pairing::PairingService;
use crate::registry::ConnectionRegistry;
use crate::service::RequestHandler;
use crate::session::{ClientSession, ConnectionId};
use io_reactor::{Completion, ConnId, ListenerId, Reactor};
use protocol_motion::{ControllerDataFrame, NOTIFICATION_REQUEST_ID, Response};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bound on re-poll rounds within one tick.
///
/// A datagram send usually completes inside the call, which frees the shared
/// socket for the next queued frame; re-running the scheduler inside the
/// same tick keeps the socket busy. The bound stops one flooding session
/// from monopolizing the loop.
pub const MAX_POLL_ITERATIONS: usize = 32;

/// The server-side network core.
///
/// Constructed by [`startup`](NetworkCore::startup) and torn down by
/// [`shutdown`](NetworkCore::shutdown); one instance per server.
pub struct NetworkCore<H: RequestHandler> {
    reactor: Reactor,
    listener: Option<ListenerId>,
    registry: ConnectionRegistry,
    pairing: PairingService,
    handler: H,
    max_queued_dataframes: usize,
    local_addr: SocketAddr,
}

impl<H: RequestHandler> NetworkCore<H> {
    /// Bind the stream acceptor and the shared datagram socket on the same
    /// port and arm both.
    pub fn startup(addr: SocketAddr, config: &Config, handler: H) -> io::Result<Self> {
        let mut reactor = Reactor::new()?;

        let listener = reactor.listen(addr, config.network.backlog)?;
        let local_addr = reactor.listener_local_addr(listener)?;
        // The datagram socket shares the acceptor's port
        let udp = reactor.bind_udp(local_addr)?;

        info!(address = %local_addr, "network core listening");

        Ok(Self {
            reactor,
            listener: Some(listener),
            registry: ConnectionRegistry::new(),
            pairing: PairingService::new(udp),
            handler,
            max_queued_dataframes: config.telemetry.max_queued_dataframes,
            local_addr,
        })
    }

    /// The address both transports are bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live sessions.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Access the request handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Advance all I/O: one bounded poll/drain cycle.
    ///
    /// Runs the datagram scheduler, drives ready completions, and re-polls
    /// while queued dataframes can still make progress this tick, up to
    /// [`MAX_POLL_ITERATIONS`] rounds.
    pub fn poll(&mut self) {
        for _ in 0..MAX_POLL_ITERATIONS {
            self.pairing
                .schedule_datagram_write(&mut self.reactor, &mut self.registry);
            self.reap_stopped();

            match self.reactor.poll(Some(Duration::ZERO)) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!(error = %e, "reactor poll failed");
                    return;
                }
            }

            for completion in self.reactor.drain_completions() {
                self.dispatch(completion);
            }

            if !self.datagram_write_ready() {
                break;
            }
        }
    }

    /// Whether another scheduler pass could start a datagram write right
    /// now: some paired session holds queued frames and the shared socket
    /// has no outstanding send.
    fn datagram_write_ready(&self) -> bool {
        if self.pairing.ack_pending() {
            return false;
        }
        let mut ready = false;
        for session in self.registry.iter() {
            if session.udp_write_inflight() {
                return false;
            }
            if session.udp_peer().is_some() && session.has_queued_dataframes() {
                ready = true;
            }
        }
        ready
    }

    fn dispatch(&mut self, completion: Completion) {
        match completion {
            Completion::Accept { conn_id, addr, .. } => {
                self.handle_accept(conn_id, addr);
            }

            Completion::Recv { conn_id } => {
                let Some(id) = self.registry.lookup_by_sock(conn_id) else {
                    return;
                };
                let Self {
                    reactor,
                    registry,
                    handler,
                    ..
                } = self;
                if let Some(session) = registry.lookup_mut(id) {
                    session.handle_readable(reactor, handler);
                }
                self.reap(id);
            }

            Completion::SendReady { conn_id } => {
                let Some(id) = self.registry.lookup_by_sock(conn_id) else {
                    return;
                };
                let Self {
                    reactor, registry, ..
                } = self;
                if let Some(session) = registry.lookup_mut(id) {
                    session.handle_writable(reactor);
                }
                self.reap(id);
            }

            Completion::Closed { conn_id } => {
                if let Some(id) = self.registry.lookup_by_sock(conn_id) {
                    self.stop_session(id, "peer closed the stream");
                }
            }

            Completion::Error { conn_id, error } => {
                if let Some(id) = self.registry.lookup_by_sock(conn_id) {
                    warn!(connection_id = id, error = %error, "stream socket error");
                    self.stop_session(id, "socket error");
                }
            }

            Completion::ListenerError { listener_id, error } => {
                // Terminal for the acceptor: never re-armed
                error!(error = %error, "acceptor failed; no longer accepting connections");
                let _ = self.reactor.close_listener(listener_id);
                self.listener = None;
            }

            Completion::UdpReadable { .. } => {
                self.pairing.drive(&mut self.reactor, &mut self.registry);
            }

            Completion::UdpWritable { .. } => {
                // The pending ack flushes first and the pairing read
                // resumes; then any stalled telemetry frame. Fresh sends
                // wait for the next scheduler pass.
                self.pairing.drive(&mut self.reactor, &mut self.registry);
                if self.pairing.ack_pending() {
                    return;
                }
                let Self {
                    reactor,
                    registry,
                    pairing,
                    ..
                } = self;
                for session in registry.iter_mut() {
                    if session.udp_write_inflight() {
                        session.flush_datagram_write(reactor, pairing.udp_socket());
                        break;
                    }
                }
                self.reap_stopped();
            }

            Completion::UdpError { error, .. } => {
                warn!(error = %error, "datagram socket error");
            }
        }
    }

    fn handle_accept(&mut self, conn_id: ConnId, addr: SocketAddr) {
        CONNECTIONS_ACCEPTED.increment();
        CONNECTIONS_ACTIVE.increment();

        let id = self.registry.allocate_id();
        info!(connection_id = id, peer = %addr, "accepted stream connection");

        let mut session = ClientSession::new(id, conn_id, addr, self.max_queued_dataframes);
        session.start(&mut self.reactor);
        self.registry.insert(session);

        // The connection-info write can fail immediately
        self.reap(id);
    }

    /// Remove the session if it has stopped.
    fn reap(&mut self, id: ConnectionId) {
        let stopped = self
            .registry
            .lookup(id)
            .map(|s| s.is_stopped())
            .unwrap_or(false);
        if stopped {
            self.remove_session(id);
        }
    }

    /// Remove every stopped session.
    fn reap_stopped(&mut self) {
        let stopped: Vec<ConnectionId> = self
            .registry
            .iter()
            .filter(|s| s.is_stopped())
            .map(|s| s.id())
            .collect();
        for id in stopped {
            self.remove_session(id);
        }
    }

    fn stop_session(&mut self, id: ConnectionId, reason: &str) {
        let Self {
            reactor, registry, ..
        } = self;
        if let Some(session) = registry.lookup_mut(id) {
            debug!(connection_id = id, reason, "stopping session");
            session.stop(reactor);
        }
        self.remove_session(id);
    }

    fn remove_session(&mut self, id: ConnectionId) {
        if self.registry.remove(id).is_some() {
            CONNECTIONS_ACTIVE.decrement();
            self.handler.handle_connection_stopped(id);
            info!(connection_id = id, "connection closed");
        }
    }

    /// Send a server-initiated notification to one session.
    ///
    /// The response's `request_id` is forced to the notification sentinel.
    /// Unknown ids are a silent no-op.
    pub fn send_notification(&mut self, connection_id: ConnectionId, mut response: Response) {
        response.request_id = NOTIFICATION_REQUEST_ID;
        let Self {
            reactor, registry, ..
        } = self;
        let Some(session) = registry.lookup_mut(connection_id) else {
            return;
        };
        session.enqueue_response(response);
        NOTIFICATIONS_SENT.increment();
        session.start_stream_write(reactor);
        self.reap(connection_id);
    }

    /// Send a server-initiated notification to every session.
    pub fn broadcast_notification(&mut self, mut response: Response) {
        response.request_id = NOTIFICATION_REQUEST_ID;
        let Self {
            reactor, registry, ..
        } = self;
        for session in registry.iter_mut() {
            session.enqueue_response(response);
            NOTIFICATIONS_SENT.increment();
            session.start_stream_write(reactor);
        }
        self.reap_stopped();
    }

    /// Queue a telemetry frame for one session and give the scheduler a
    /// chance to start it.
    ///
    /// Unknown ids are a silent no-op. Transmission requires the session to
    /// have paired its datagram endpoint; until then frames stay queued.
    pub fn send_controller_data_frame(
        &mut self,
        connection_id: ConnectionId,
        frame: ControllerDataFrame,
    ) {
        let Some(session) = self.registry.lookup_mut(connection_id) else {
            return;
        };
        session.enqueue_dataframe(frame);

        self.pairing
            .schedule_datagram_write(&mut self.reactor, &mut self.registry);
        self.reap_stopped();
    }

    /// Stop every session, close the acceptor and the datagram socket.
    ///
    /// After this `poll()` is a no-op and no further bytes leave the server.
    pub fn shutdown(&mut self) {
        info!(
            connections = self.registry.len(),
            "shutting down network core"
        );

        for id in self.registry.close_all(&mut self.reactor) {
            CONNECTIONS_ACTIVE.decrement();
            self.handler.handle_connection_stopped(id);
        }

        if let Some(listener) = self.listener.take() {
            let _ = self.reactor.close_listener(listener);
        }
        let _ = self.reactor.close_udp(self.pairing.udp_socket());
    }
}
