//! The datagram pairing handshake and the telemetry send scheduler.
//!
//! Both live on the one shared UDP socket. A client proves which stream
//! session it owns by echoing its connection id (4 bytes, little-endian)
//! from the endpoint it wants telemetry on; the server binds that endpoint
//! to the session and answers with a single accept/reject byte.
//!
//! The socket is single-writer: while an ack is pending, or any session has
//! a datagram write in flight, nothing else may send.

use crate::metrics::{PAIRINGS_ACCEPTED, PAIRINGS_REJECTED};
use crate::registry::ConnectionRegistry;
use io_reactor::{Reactor, UdpSocketId};
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Wire size of a pairing request: one little-endian i32 connection id.
const PAIRING_ID_LEN: usize = 4;

/// Ack byte for an accepted pairing.
const PAIRING_ACCEPTED: u8 = 1;

/// Ack byte for a rejected pairing.
const PAIRING_REJECTED: u8 = 0;

#[derive(Debug, Clone, Copy)]
struct PendingAck {
    peer: SocketAddr,
    byte: u8,
}

/// Owner of the pairing state machine on the shared datagram socket.
pub struct PairingService {
    udp: UdpSocketId,
    recv_buf: [u8; 64],
    pending_ack: Option<PendingAck>,
}

impl PairingService {
    pub fn new(udp: UdpSocketId) -> Self {
        Self {
            udp,
            recv_buf: [0; 64],
            pending_ack: None,
        }
    }

    /// The shared datagram socket id.
    pub fn udp_socket(&self) -> UdpSocketId {
        self.udp
    }

    /// Whether an ack write is still waiting on the socket.
    pub fn ack_pending(&self) -> bool {
        self.pending_ack.is_some()
    }

    /// Drain pairing datagrams from the shared socket.
    ///
    /// Consumption pauses while an ack write is pending and resumes once it
    /// flushes; receive errors are logged and the state machine stays armed.
    pub fn drive(&mut self, reactor: &mut Reactor, registry: &mut ConnectionRegistry) {
        loop {
            if self.pending_ack.is_some() && !self.flush_ack(reactor) {
                return;
            }

            match reactor.recv_from(self.udp, &mut self.recv_buf) {
                Ok((len, peer)) => self.handle_datagram(reactor, registry, len, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "failed to receive pairing datagram");
                    return;
                }
            }
        }
    }

    fn handle_datagram(
        &mut self,
        reactor: &mut Reactor,
        registry: &mut ConnectionRegistry,
        len: usize,
        peer: SocketAddr,
    ) {
        if len != PAIRING_ID_LEN {
            warn!(%peer, len, "ignoring pairing datagram with unexpected size");
            return;
        }

        let mut id_bytes = [0u8; PAIRING_ID_LEN];
        id_bytes.copy_from_slice(&self.recv_buf[..PAIRING_ID_LEN]);
        let connection_id = i32::from_le_bytes(id_bytes);

        let byte = match registry.lookup_mut(connection_id) {
            Some(session) => {
                session.bind_udp_peer(peer);
                PAIRINGS_ACCEPTED.increment();
                info!(connection_id, %peer, "paired datagram endpoint");
                PAIRING_ACCEPTED
            }
            None => {
                PAIRINGS_REJECTED.increment();
                warn!(connection_id, %peer, "pairing request for unknown connection");
                PAIRING_REJECTED
            }
        };

        self.pending_ack = Some(PendingAck { peer, byte });
        self.flush_ack(reactor);
    }

    /// Push the pending ack into the socket.
    ///
    /// Returns true when no ack remains pending. A failed ack send is
    /// logged and abandoned so pairing can continue; the client retries.
    pub fn flush_ack(&mut self, reactor: &mut Reactor) -> bool {
        let Some(ack) = self.pending_ack else {
            return true;
        };

        match reactor.send_to(self.udp, &[ack.byte], ack.peer) {
            Ok(_) => {
                debug!(peer = %ack.peer, accepted = ack.byte == PAIRING_ACCEPTED, "sent pairing ack");
                self.pending_ack = None;
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                warn!(peer = %ack.peer, error = %e, "failed to send pairing ack");
                self.pending_ack = None;
                true
            }
        }
    }

    /// One scheduling pass: start at most one datagram write across all
    /// sessions, in registry order.
    ///
    /// The first session to start a write ends the pass. Nothing starts
    /// while any send is outstanding on the shared socket - an ack write or
    /// another session's telemetry frame.
    pub fn schedule_datagram_write(
        &mut self,
        reactor: &mut Reactor,
        registry: &mut ConnectionRegistry,
    ) {
        if self.pending_ack.is_some() {
            return;
        }
        if registry.iter().any(|s| s.udp_write_inflight()) {
            return;
        }

        for session in registry.iter_mut() {
            if session.start_datagram_write(reactor, self.udp) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientSession;
    use io_reactor::{Completion, ConnId};
    use std::net::UdpSocket;
    use std::time::{Duration, Instant};

    struct Fixture {
        reactor: Reactor,
        registry: ConnectionRegistry,
        pairing: PairingService,
        server_addr: SocketAddr,
    }

    fn fixture() -> Fixture {
        let mut reactor = Reactor::new().unwrap();
        let udp = reactor.bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = reactor.udp_local_addr(udp).unwrap();
        Fixture {
            reactor,
            registry: ConnectionRegistry::new(),
            pairing: PairingService::new(udp),
            server_addr,
        }
    }

    fn add_session(fixture: &mut Fixture) -> i32 {
        let id = fixture.registry.allocate_id();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        fixture
            .registry
            .insert(ClientSession::new(id, ConnId::new(100 + id as usize), addr, 16));
        id
    }

    /// Drive the pairing service until the client receives an ack byte.
    fn pair_and_read_ack(fixture: &mut Fixture, client: &UdpSocket, id: i32) -> Option<u8> {
        client
            .send_to(&id.to_le_bytes(), fixture.server_addr)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        let mut ack = [0u8; 8];
        while Instant::now() < deadline {
            fixture
                .reactor
                .poll(Some(Duration::from_millis(10)))
                .unwrap();
            for completion in fixture.reactor.drain_completions() {
                if matches!(completion, Completion::UdpReadable { .. }) {
                    fixture
                        .pairing
                        .drive(&mut fixture.reactor, &mut fixture.registry);
                }
            }
            match client.recv_from(&mut ack) {
                Ok((1, _)) => return Some(ack[0]),
                Ok(_) => return None,
                Err(_) => {}
            }
        }
        None
    }

    fn nonblocking_client() -> UdpSocket {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_nonblocking(true).unwrap();
        client
    }

    #[test]
    fn test_pairing_known_id_binds_peer() {
        let mut fixture = fixture();
        let id = add_session(&mut fixture);
        let client = nonblocking_client();

        let ack = pair_and_read_ack(&mut fixture, &client, id);
        assert_eq!(ack, Some(PAIRING_ACCEPTED));

        let session = fixture.registry.lookup(id).unwrap();
        assert_eq!(session.udp_peer(), Some(client.local_addr().unwrap()));

        fixture.registry.close_all(&mut fixture.reactor);
    }

    #[test]
    fn test_pairing_unknown_id_rejected() {
        let mut fixture = fixture();
        let client = nonblocking_client();

        let ack = pair_and_read_ack(&mut fixture, &client, -1);
        assert_eq!(ack, Some(PAIRING_REJECTED));
        assert!(fixture.registry.is_empty());
    }

    #[test]
    fn test_pairing_ignores_wrong_size_datagram() {
        let mut fixture = fixture();
        let id = add_session(&mut fixture);
        let client = nonblocking_client();

        // Two bytes is not a pairing request; it must produce no reply
        client.send_to(&[0, 0], fixture.server_addr).unwrap();

        let deadline = Instant::now() + Duration::from_millis(300);
        let mut ack = [0u8; 8];
        while Instant::now() < deadline {
            fixture
                .reactor
                .poll(Some(Duration::from_millis(10)))
                .unwrap();
            fixture.reactor.drain_completions();
            fixture
                .pairing
                .drive(&mut fixture.reactor, &mut fixture.registry);
            assert!(client.recv_from(&mut ack).is_err(), "unexpected ack");
        }

        // A valid pairing still works afterwards
        let ack = pair_and_read_ack(&mut fixture, &client, id);
        assert_eq!(ack, Some(PAIRING_ACCEPTED));

        fixture.registry.close_all(&mut fixture.reactor);
    }

    #[test]
    fn test_scheduler_starts_at_most_one_write() {
        let mut fixture = fixture();
        let first = add_session(&mut fixture);
        let second = add_session(&mut fixture);

        let sink = nonblocking_client();
        let sink_addr = sink.local_addr().unwrap();

        let frame = protocol_motion::ControllerDataFrame {
            controller_id: 0,
            sequence_num: 1,
            buttons: 0,
            trigger: 0,
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
            extension: Vec::new(),
        };

        for id in [first, second] {
            let session = fixture.registry.lookup_mut(id).unwrap();
            session.bind_udp_peer(sink_addr);
            session.enqueue_dataframe(frame.clone());
        }

        fixture
            .pairing
            .schedule_datagram_write(&mut fixture.reactor, &mut fixture.registry);

        // Registry order: the first session sent, the second still waits
        assert!(
            !fixture
                .registry
                .lookup(first)
                .unwrap()
                .has_queued_dataframes()
        );
        assert!(
            fixture
                .registry
                .lookup(second)
                .unwrap()
                .has_queued_dataframes()
        );

        fixture.registry.close_all(&mut fixture.reactor);
    }

    #[test]
    fn test_scheduler_skips_unpaired_sessions() {
        let mut fixture = fixture();
        let unpaired = add_session(&mut fixture);
        let paired = add_session(&mut fixture);

        let sink = nonblocking_client();
        let sink_addr = sink.local_addr().unwrap();

        let frame = protocol_motion::ControllerDataFrame {
            controller_id: 0,
            sequence_num: 7,
            buttons: 0,
            trigger: 0,
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
            extension: Vec::new(),
        };

        fixture
            .registry
            .lookup_mut(unpaired)
            .unwrap()
            .enqueue_dataframe(frame.clone());
        {
            let session = fixture.registry.lookup_mut(paired).unwrap();
            session.bind_udp_peer(sink_addr);
            session.enqueue_dataframe(frame);
        }

        fixture
            .pairing
            .schedule_datagram_write(&mut fixture.reactor, &mut fixture.registry);

        // The unpaired session keeps its frame; the paired one transmitted
        assert!(
            fixture
                .registry
                .lookup(unpaired)
                .unwrap()
                .has_queued_dataframes()
        );
        assert!(
            !fixture
                .registry
                .lookup(paired)
                .unwrap()
                .has_queued_dataframes()
        );

        fixture.registry.close_all(&mut fixture.reactor);
    }
}
