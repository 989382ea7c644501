//! Per-client session state.
//!
//! A session owns one TCP stream (by reactor id), an optional paired
//! datagram endpoint, and two FIFO write queues: responses for the stream
//! and dataframes for the shared UDP socket. At most one stream write and at
//! most one datagram write are ever in flight; under the readiness-based
//! reactor "in flight" means unsent bytes remain in the outbound scratch
//! buffer for that transport.
//!
//! The session never decides when a datagram write starts - the driver's
//! scheduler arbitrates the shared socket across all sessions.

use crate::metrics::{
    DATAFRAMES_DROPPED, DATAFRAMES_SENT, PROTOCOL_ERRORS, REQUESTS_DISPATCHED, RESPONSES_SENT,
};
use crate::service::RequestHandler;
use io_reactor::{ConnId, Reactor, UdpSocketId};
use protocol_motion::frame::{self, HEADER_SIZE};
use protocol_motion::{ControllerDataFrame, Request, Response};
use std::collections::VecDeque;
use std::io;
use std::net::{Shutdown, SocketAddr};
use tracing::{debug, error, warn};

/// Server-assigned id identifying a session for the lifetime of the process.
///
/// Monotonically assigned from 0 and never reused; the 4-byte wire form of
/// this id is what a client echoes over UDP to pair its datagram endpoint.
pub type ConnectionId = i32;

/// Progress of the inbound stream read state machine.
#[derive(Debug, Clone, Copy)]
enum ReadStage {
    /// Accumulating the fixed-size length header.
    Header { filled: usize },
    /// Accumulating the message body; expected length is `body_buf.len()`.
    Body { filled: usize },
}

/// The server-side state of one connected client.
pub struct ClientSession {
    id: ConnectionId,
    sock: ConnId,
    peer_addr: SocketAddr,
    udp_peer: Option<SocketAddr>,

    response_queue: VecDeque<Response>,
    dataframe_queue: VecDeque<ControllerDataFrame>,
    max_queued_dataframes: usize,

    stream_write_inflight: bool,
    udp_write_inflight: bool,
    stopped: bool,

    read_stage: ReadStage,
    header_buf: [u8; HEADER_SIZE],
    body_buf: Vec<u8>,

    // Encoded message body being framed for either transport
    body_scratch: Vec<u8>,
    // Current outbound stream frame and how much of it has been written
    write_buf: Vec<u8>,
    write_pos: usize,
    // Current outbound datagram
    dataframe_buf: Vec<u8>,
}

impl ClientSession {
    pub fn new(
        id: ConnectionId,
        sock: ConnId,
        peer_addr: SocketAddr,
        max_queued_dataframes: usize,
    ) -> Self {
        Self {
            id,
            sock,
            peer_addr,
            udp_peer: None,
            response_queue: VecDeque::new(),
            dataframe_queue: VecDeque::new(),
            max_queued_dataframes,
            stream_write_inflight: false,
            udp_write_inflight: false,
            stopped: false,
            read_stage: ReadStage::Header { filled: 0 },
            header_buf: [0; HEADER_SIZE],
            body_buf: Vec::new(),
            body_scratch: Vec::new(),
            write_buf: Vec::new(),
            write_pos: 0,
            dataframe_buf: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn sock(&self) -> ConnId {
        self.sock
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn udp_peer(&self) -> Option<SocketAddr> {
        self.udp_peer
    }

    /// Associate the session with its datagram endpoint.
    pub fn bind_udp_peer(&mut self, endpoint: SocketAddr) {
        self.udp_peer = Some(endpoint);
    }

    pub fn has_queued_dataframes(&self) -> bool {
        !self.dataframe_queue.is_empty()
    }

    pub fn udp_write_inflight(&self) -> bool {
        self.udp_write_inflight
    }

    /// Number of responses waiting for stream transmission.
    pub fn pending_responses(&self) -> usize {
        self.response_queue.len()
    }

    /// Begin the session: queue the connection-info notification the client
    /// needs for pairing. Reads start implicitly as stream data arrives.
    pub fn start(&mut self, reactor: &mut Reactor) {
        debug!(connection_id = self.id, "sending connection id to client");
        self.enqueue_response(Response::connection_info(self.id));
        self.start_stream_write(reactor);
    }

    /// Stop the session: shut the stream down both ways and release it.
    ///
    /// Idempotent. After this, every enqueue and I/O entry point is a no-op.
    pub fn stop(&mut self, reactor: &mut Reactor) {
        if self.stopped {
            return;
        }

        if let Err(e) = reactor.shutdown(self.sock, Shutdown::Both) {
            debug!(connection_id = self.id, error = %e, "problem shutting down the stream socket");
        }
        if let Err(e) = reactor.close(self.sock) {
            warn!(connection_id = self.id, error = %e, "problem closing the stream socket");
        }

        self.stream_write_inflight = false;
        self.udp_write_inflight = false;
        self.stopped = true;
    }

    /// Queue a response for stream transmission. No I/O is started.
    pub fn enqueue_response(&mut self, response: Response) {
        if self.stopped {
            return;
        }
        self.response_queue.push_back(response);
    }

    /// Start transmitting queued responses if nothing is already in flight.
    ///
    /// Returns whether a stream write is in flight afterwards.
    pub fn start_stream_write(&mut self, reactor: &mut Reactor) -> bool {
        if self.stopped {
            return false;
        }
        if let Err(e) = self.pump_stream_writes(reactor) {
            error!(connection_id = self.id, error = %e, "stream write failed");
            self.stop(reactor);
            return false;
        }
        self.stream_write_inflight
    }

    /// The stream became writable again; continue the in-flight write.
    pub fn handle_writable(&mut self, reactor: &mut Reactor) {
        if self.stopped {
            return;
        }
        if let Err(e) = self.pump_stream_writes(reactor) {
            error!(connection_id = self.id, error = %e, "stream write failed");
            self.stop(reactor);
        }
    }

    /// Frame queued responses and push them into the socket until the queue
    /// drains or the socket blocks. Completing one write pops the front of
    /// the queue and immediately begins the next.
    fn pump_stream_writes(&mut self, reactor: &mut Reactor) -> io::Result<()> {
        loop {
            if !self.stream_write_inflight {
                let Some(response) = self.response_queue.front() else {
                    return Ok(());
                };

                self.body_scratch.clear();
                response.encode(&mut self.body_scratch);
                self.write_buf.clear();
                self.write_pos = 0;
                if let Err(e) = frame::pack_message(&self.body_scratch, &mut self.write_buf) {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }

                self.stream_write_inflight = true;
            }

            while self.write_pos < self.write_buf.len() {
                match reactor.send(self.sock, &self.write_buf[self.write_pos..]) {
                    Ok(n) => self.write_pos += n,
                    // SendReady will resume this write
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(e),
                }
            }

            self.stream_write_inflight = false;
            self.response_queue.pop_front();
            RESPONSES_SENT.increment();
        }
    }

    /// Stream data arrived; advance the read state machine.
    ///
    /// Consumes bytes until the socket blocks, dispatching each complete
    /// request to the handler. Decode failures and I/O errors stop the
    /// session.
    pub fn handle_readable(&mut self, reactor: &mut Reactor, handler: &mut dyn RequestHandler) {
        loop {
            if self.stopped {
                return;
            }

            match self.read_stage {
                ReadStage::Header { filled } => {
                    match reactor.recv(self.sock, &mut self.header_buf[filled..]) {
                        Ok(n) => {
                            let filled = filled + n;
                            if filled < HEADER_SIZE {
                                self.read_stage = ReadStage::Header { filled };
                                continue;
                            }
                            match frame::decode_header(&self.header_buf) {
                                Ok(len) => {
                                    self.body_buf.clear();
                                    self.body_buf.resize(len, 0);
                                    self.read_stage = ReadStage::Body { filled: 0 };
                                }
                                Err(e) => {
                                    PROTOCOL_ERRORS.increment();
                                    error!(connection_id = self.id, error = %e, "invalid frame header");
                                    self.stop(reactor);
                                    return;
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.read_stage = ReadStage::Header { filled };
                            return;
                        }
                        Err(e) => {
                            debug!(connection_id = self.id, error = %e, "stream read failed");
                            self.stop(reactor);
                            return;
                        }
                    }
                }
                ReadStage::Body { filled } => {
                    // A zero-length body completes without touching the socket
                    if filled >= self.body_buf.len() {
                        self.dispatch(reactor, handler);
                        continue;
                    }
                    match reactor.recv(self.sock, &mut self.body_buf[filled..]) {
                        Ok(n) => {
                            self.read_stage = ReadStage::Body { filled: filled + n };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                        Err(e) => {
                            debug!(connection_id = self.id, error = %e, "stream read failed");
                            self.stop(reactor);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// A complete request body is buffered: parse it, run the handler, and
    /// queue its response.
    fn dispatch(&mut self, reactor: &mut Reactor, handler: &mut dyn RequestHandler) {
        match Request::parse(&self.body_buf) {
            Ok(request) => {
                REQUESTS_DISPATCHED.increment();
                let response = handler.handle_request(self.id, &request);
                self.enqueue_response(response);
                self.start_stream_write(reactor);
                self.read_stage = ReadStage::Header { filled: 0 };
            }
            Err(e) => {
                PROTOCOL_ERRORS.increment();
                error!(connection_id = self.id, error = %e, "malformed request body");
                self.stop(reactor);
            }
        }
    }

    /// Queue a telemetry frame for datagram transmission. No I/O is started.
    ///
    /// When the queue is at capacity the oldest frame is dropped - a client
    /// that falls behind gets the freshest telemetry, not a growing backlog.
    pub fn enqueue_dataframe(&mut self, frame: ControllerDataFrame) {
        if self.stopped {
            return;
        }
        if self.dataframe_queue.len() >= self.max_queued_dataframes {
            DATAFRAMES_DROPPED.increment();
            debug!(
                connection_id = self.id,
                "dataframe queue full, dropping oldest frame"
            );
            self.dataframe_queue.pop_front();
        }
        self.dataframe_queue.push_back(frame);
    }

    /// Try to start sending the front of the dataframe queue.
    ///
    /// Returns whether a datagram write is in flight for this session. A
    /// frame that cannot fit in one datagram is logged and dropped; the
    /// queue advances and no send starts this pass.
    pub fn start_datagram_write(&mut self, reactor: &mut Reactor, udp: UdpSocketId) -> bool {
        if self.stopped {
            return false;
        }
        if self.udp_write_inflight {
            return true;
        }
        let Some(peer) = self.udp_peer else {
            return false;
        };
        let Some(front) = self.dataframe_queue.front() else {
            return false;
        };

        self.body_scratch.clear();
        front.encode(&mut self.body_scratch);
        self.dataframe_buf.clear();
        if let Err(e) = frame::pack_datagram(&self.body_scratch, &mut self.dataframe_buf) {
            warn!(connection_id = self.id, error = %e, "dropping dataframe too big for one packet");
            DATAFRAMES_DROPPED.increment();
            self.dataframe_queue.pop_front();
            return false;
        }

        match reactor.send_to(udp, &self.dataframe_buf, peer) {
            Ok(_) => {
                // Completed within the call
                self.dataframe_queue.pop_front();
                DATAFRAMES_SENT.increment();
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.udp_write_inflight = true;
                true
            }
            Err(e) => {
                error!(connection_id = self.id, error = %e, "datagram send failed");
                self.stop(reactor);
                false
            }
        }
    }

    /// The shared socket became writable; finish the pending datagram.
    pub fn flush_datagram_write(&mut self, reactor: &mut Reactor, udp: UdpSocketId) {
        if self.stopped || !self.udp_write_inflight {
            return;
        }
        let Some(peer) = self.udp_peer else {
            self.udp_write_inflight = false;
            return;
        };

        match reactor.send_to(udp, &self.dataframe_buf, peer) {
            Ok(_) => {
                self.udp_write_inflight = false;
                self.dataframe_queue.pop_front();
                DATAFRAMES_SENT.increment();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                error!(connection_id = self.id, error = %e, "datagram send failed");
                self.stop(reactor);
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        // The socket must have been released through stop() by this point
        debug_assert!(self.stopped, "session {} dropped while live", self.id);
    }
}
