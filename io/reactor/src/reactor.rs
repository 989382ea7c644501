//! The mio-backed reactor: epoll on Linux, kqueue on macOS.

use crate::types::{Completion, ConnId, ListenerId, UdpSocketId};
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream, UdpSocket as MioUdpSocket};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Token offset for datagram sockets to avoid collision with connections.
const UDP_TOKEN_OFFSET: usize = 1 << 29;

/// Token offset for listeners to avoid collision with everything else.
const LISTENER_TOKEN_OFFSET: usize = 1 << 30;

struct StreamConn {
    stream: MioTcpStream,
    readable: bool,
    writable: bool,
}

struct Listener {
    listener: MioTcpListener,
}

struct DatagramSock {
    socket: MioUdpSocket,
    writable: bool,
}

/// Readiness-based I/O reactor.
///
/// Owns every registered socket. Readable/writable state is tracked per
/// socket so that calls made between polls short-circuit to `WouldBlock`
/// instead of hitting the kernel, and is cleared whenever a syscall reports
/// `WouldBlock`.
pub struct Reactor {
    poll: Poll,
    events: Events,
    connections: Slab<StreamConn>,
    listeners: Slab<Listener>,
    udp_sockets: Slab<DatagramSock>,
    pending_completions: Vec<Completion>,
}

impl Reactor {
    /// Create a new reactor with default capacities.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(4096)
    }

    /// Create a new reactor sized for the given number of connections.
    pub fn with_capacity(max_connections: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            connections: Slab::with_capacity(max_connections.min(4096)),
            listeners: Slab::with_capacity(4),
            udp_sockets: Slab::with_capacity(4),
            pending_completions: Vec::with_capacity(256),
        })
    }

    // === Listener operations ===

    /// Bind and start listening on an address.
    ///
    /// New connections are registered automatically and reported via
    /// [`Completion::Accept`].
    pub fn listen(&mut self, addr: SocketAddr, backlog: u32) -> io::Result<ListenerId> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;

        let std_listener: std::net::TcpListener = socket.into();
        let mut mio_listener = MioTcpListener::from_std(std_listener);

        let entry = self.listeners.vacant_entry();
        let id = entry.key();

        self.poll.registry().register(
            &mut mio_listener,
            Token(id + LISTENER_TOKEN_OFFSET),
            Interest::READABLE,
        )?;

        entry.insert(Listener {
            listener: mio_listener,
        });

        Ok(ListenerId::new(id))
    }

    /// Get the local address a listener is bound to.
    pub fn listener_local_addr(&self, id: ListenerId) -> io::Result<SocketAddr> {
        self.listeners
            .get(id.as_usize())
            .ok_or_else(not_found)?
            .listener
            .local_addr()
    }

    /// Close a listener and stop accepting new connections.
    pub fn close_listener(&mut self, id: ListenerId) -> io::Result<()> {
        if let Some(mut listener) = self.listeners.try_remove(id.as_usize()) {
            self.poll.registry().deregister(&mut listener.listener)?;
        }
        Ok(())
    }

    // === Stream connection operations ===

    /// Register an already-connected TCP stream with the reactor.
    pub fn register(&mut self, stream: TcpStream) -> io::Result<ConnId> {
        stream.set_nonblocking(true)?;
        let mut mio_stream = MioTcpStream::from_std(stream);

        let entry = self.connections.vacant_entry();
        let id = entry.key();

        self.poll.registry().register(
            &mut mio_stream,
            Token(id),
            Interest::READABLE | Interest::WRITABLE,
        )?;

        entry.insert(StreamConn {
            stream: mio_stream,
            readable: false,
            writable: true,
        });

        Ok(ConnId::new(id))
    }

    /// Shut down one or both directions of a connection.
    pub fn shutdown(&mut self, id: ConnId, how: Shutdown) -> io::Result<()> {
        self.connections
            .get(id.as_usize())
            .ok_or_else(not_found)?
            .stream
            .shutdown(how)
    }

    /// Close a connection, deregistering it and releasing the socket.
    pub fn close(&mut self, id: ConnId) -> io::Result<()> {
        if let Some(mut conn) = self.connections.try_remove(id.as_usize()) {
            self.poll.registry().deregister(&mut conn.stream)?;
        }
        Ok(())
    }

    /// Send data on a connection.
    ///
    /// # Returns
    ///
    /// - `Ok(n)` - `n` bytes were written
    /// - `Err(WouldBlock)` - try again after [`Completion::SendReady`]
    /// - `Err(other)` - the connection failed
    pub fn send(&mut self, id: ConnId, data: &[u8]) -> io::Result<usize> {
        let conn = self
            .connections
            .get_mut(id.as_usize())
            .ok_or_else(not_found)?;

        if !conn.writable {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        match conn.stream.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.writable = false;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Receive data from a connection.
    ///
    /// # Returns
    ///
    /// - `Ok(n)` - `n` bytes were read into `buf`
    /// - `Err(ConnectionReset)` - the peer closed the connection
    /// - `Err(WouldBlock)` - wait for [`Completion::Recv`]
    /// - `Err(other)` - the connection failed
    pub fn recv(&mut self, id: ConnId, buf: &mut [u8]) -> io::Result<usize> {
        let conn = self
            .connections
            .get_mut(id.as_usize())
            .ok_or_else(not_found)?;

        match conn.stream.read(buf) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection closed",
            )),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.readable = false;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // === Datagram socket operations ===

    /// Bind a datagram socket to an address.
    pub fn bind_udp(&mut self, addr: SocketAddr) -> io::Result<UdpSocketId> {
        let mut socket = MioUdpSocket::bind(addr)?;

        let entry = self.udp_sockets.vacant_entry();
        let id = entry.key();

        self.poll.registry().register(
            &mut socket,
            Token(id + UDP_TOKEN_OFFSET),
            Interest::READABLE | Interest::WRITABLE,
        )?;

        entry.insert(DatagramSock {
            socket,
            writable: true,
        });

        Ok(UdpSocketId::new(id))
    }

    /// Get the local address a datagram socket is bound to.
    pub fn udp_local_addr(&self, id: UdpSocketId) -> io::Result<SocketAddr> {
        self.udp_sockets
            .get(id.as_usize())
            .ok_or_else(not_found)?
            .socket
            .local_addr()
    }

    /// Close a datagram socket.
    pub fn close_udp(&mut self, id: UdpSocketId) -> io::Result<()> {
        if let Some(mut sock) = self.udp_sockets.try_remove(id.as_usize()) {
            self.poll.registry().deregister(&mut sock.socket)?;
        }
        Ok(())
    }

    /// Receive a single datagram.
    ///
    /// # Returns
    ///
    /// - `Ok((n, source))` - `n` bytes from `source` were read into `buf`
    /// - `Err(WouldBlock)` - wait for [`Completion::UdpReadable`]
    pub fn recv_from(&mut self, id: UdpSocketId, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let sock = self
            .udp_sockets
            .get_mut(id.as_usize())
            .ok_or_else(not_found)?;

        sock.socket.recv_from(buf)
    }

    /// Send a single datagram to `dest`.
    ///
    /// # Returns
    ///
    /// - `Ok(n)` - the whole datagram was handed to the kernel
    /// - `Err(WouldBlock)` - try again after [`Completion::UdpWritable`]
    pub fn send_to(&mut self, id: UdpSocketId, data: &[u8], dest: SocketAddr) -> io::Result<usize> {
        let sock = self
            .udp_sockets
            .get_mut(id.as_usize())
            .ok_or_else(not_found)?;

        if !sock.writable {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        match sock.socket.send_to(data, dest) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                sock.writable = false;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // === Event loop ===

    /// Poll for readiness events with an optional timeout.
    ///
    /// Returns the number of completions ready to be drained. Completions
    /// left undrained from a previous poll are discarded.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.pending_completions.clear();

        self.poll.poll(&mut self.events, timeout)?;

        // Collect event info first to avoid borrow issues
        let events: Vec<_> = self
            .events
            .iter()
            .map(|e| {
                (
                    e.token().0,
                    e.is_readable(),
                    e.is_writable(),
                    e.is_read_closed() || e.is_write_closed(),
                    e.is_error(),
                )
            })
            .collect();

        for (token, readable, writable, closed, error) in events {
            if token >= LISTENER_TOKEN_OFFSET {
                let listener_id = token - LISTENER_TOKEN_OFFSET;
                if self.listeners.contains(listener_id) {
                    self.accept_pending(listener_id);
                }
                continue;
            }

            if token >= UDP_TOKEN_OFFSET {
                let socket_id = token - UDP_TOKEN_OFFSET;
                if let Some(sock) = self.udp_sockets.get_mut(socket_id) {
                    if readable {
                        self.pending_completions.push(Completion::UdpReadable {
                            socket_id: UdpSocketId::new(socket_id),
                        });
                    }
                    if writable {
                        sock.writable = true;
                        self.pending_completions.push(Completion::UdpWritable {
                            socket_id: UdpSocketId::new(socket_id),
                        });
                    }
                    if error {
                        self.pending_completions.push(Completion::UdpError {
                            socket_id: UdpSocketId::new(socket_id),
                            error: io::Error::other("socket error"),
                        });
                    }
                }
                continue;
            }

            if let Some(conn) = self.connections.get_mut(token) {
                if readable {
                    conn.readable = true;
                    self.pending_completions.push(Completion::Recv {
                        conn_id: ConnId::new(token),
                    });
                }
                if writable {
                    conn.writable = true;
                    self.pending_completions.push(Completion::SendReady {
                        conn_id: ConnId::new(token),
                    });
                }
                if closed {
                    self.pending_completions.push(Completion::Closed {
                        conn_id: ConnId::new(token),
                    });
                }
                if error {
                    self.pending_completions.push(Completion::Error {
                        conn_id: ConnId::new(token),
                        error: io::Error::other("socket error"),
                    });
                }
            }
        }

        Ok(self.pending_completions.len())
    }

    /// Drain all pending completions.
    pub fn drain_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.pending_completions)
    }

    // === Introspection ===

    /// Get the number of registered stream connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Get the number of datagram sockets.
    pub fn udp_socket_count(&self) -> usize {
        self.udp_sockets.len()
    }

    /// Accept all pending connections on a listener.
    fn accept_pending(&mut self, listener_id: usize) {
        let listener = match self.listeners.get(listener_id) {
            Some(l) => l,
            None => return,
        };

        loop {
            match listener.listener.accept() {
                Ok((mut stream, addr)) => {
                    let entry = self.connections.vacant_entry();
                    let conn_id = entry.key();

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        Token(conn_id),
                        Interest::READABLE | Interest::WRITABLE,
                    ) {
                        self.pending_completions.push(Completion::ListenerError {
                            listener_id: ListenerId::new(listener_id),
                            error: e,
                        });
                        continue;
                    }

                    entry.insert(StreamConn {
                        stream,
                        readable: false,
                        writable: true,
                    });

                    self.pending_completions.push(Completion::Accept {
                        listener_id: ListenerId::new(listener_id),
                        conn_id: ConnId::new(conn_id),
                        addr,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    break;
                }
                Err(e) => {
                    self.pending_completions.push(Completion::ListenerError {
                        listener_id: ListenerId::new(listener_id),
                        error: e,
                    });
                    break;
                }
            }
        }
    }
}

fn not_found() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "socket not registered")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reactor_new() {
        let reactor = Reactor::new().unwrap();
        assert_eq!(reactor.connection_count(), 0);
        assert_eq!(reactor.listener_count(), 0);
        assert_eq!(reactor.udp_socket_count(), 0);
    }

    #[test]
    fn test_close_nonexistent_connection() {
        let mut reactor = Reactor::new().unwrap();
        assert!(reactor.close(ConnId::new(999)).is_ok());
    }

    #[test]
    fn test_close_nonexistent_listener() {
        let mut reactor = Reactor::new().unwrap();
        assert!(reactor.close_listener(ListenerId::new(999)).is_ok());
    }

    #[test]
    fn test_close_nonexistent_udp() {
        let mut reactor = Reactor::new().unwrap();
        assert!(reactor.close_udp(UdpSocketId::new(999)).is_ok());
    }

    #[test]
    fn test_send_nonexistent_connection() {
        let mut reactor = Reactor::new().unwrap();
        let result = reactor.send(ConnId::new(999), b"hello");
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_recv_nonexistent_connection() {
        let mut reactor = Reactor::new().unwrap();
        let mut buf = [0u8; 64];
        let result = reactor.recv(ConnId::new(999), &mut buf);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_send_to_nonexistent_socket() {
        let mut reactor = Reactor::new().unwrap();
        let result = reactor.send_to(
            UdpSocketId::new(999),
            b"hello",
            "127.0.0.1:9".parse().unwrap(),
        );
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_poll_no_events() {
        let mut reactor = Reactor::new().unwrap();
        let count = reactor.poll(Some(Duration::from_millis(1))).unwrap();
        assert_eq!(count, 0);
        assert!(reactor.drain_completions().is_empty());
    }

    #[test]
    fn test_listen_and_close() {
        let mut reactor = Reactor::new().unwrap();
        let listener = reactor.listen("127.0.0.1:0".parse().unwrap(), 128).unwrap();
        assert_eq!(reactor.listener_count(), 1);

        let addr = reactor.listener_local_addr(listener).unwrap();
        assert_ne!(addr.port(), 0);

        reactor.close_listener(listener).unwrap();
        assert_eq!(reactor.listener_count(), 0);
    }

    #[test]
    fn test_bind_udp_and_close() {
        let mut reactor = Reactor::new().unwrap();
        let socket = reactor.bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(reactor.udp_socket_count(), 1);

        let addr = reactor.udp_local_addr(socket).unwrap();
        assert_ne!(addr.port(), 0);

        reactor.close_udp(socket).unwrap();
        assert_eq!(reactor.udp_socket_count(), 0);
    }

    #[test]
    fn test_register_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let mut reactor = Reactor::new().unwrap();
        let conn_id = reactor.register(client).unwrap();
        assert_eq!(reactor.connection_count(), 1);

        reactor.close(conn_id).unwrap();
        assert_eq!(reactor.connection_count(), 0);
    }
}
