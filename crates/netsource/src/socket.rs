//! Listening and data socket ownership.
//!
//! [`SocketManager`] holds at most one listening socket and one data socket.
//! The listener survives peer disconnects; the data socket is replaced on
//! every accept or connect. All waits are polled in short slices so a stop
//! request is noticed quickly.

use crate::config::{ConnectionType, TimingConfig};
use crate::error::{NetSourceError, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Socket identity: role plus the addresses it binds to or connects to.
///
/// Any change to these fields requires the sockets to be reopened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub connection_type: ConnectionType,
    pub ip_address: String,
    pub port: u16,
    pub bind_address: String,
}

impl Endpoint {
    /// Address string the endpoint binds to (server) or connects to (client).
    pub fn target(&self) -> String {
        match self.connection_type {
            ConnectionType::Server => format!("{}:{}", self.bind_address, self.port),
            ConnectionType::Client => format!("{}:{}", self.ip_address, self.port),
        }
    }
}

/// Result of one read attempt on the data socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were appended to the buffer.
    Data(usize),
    /// Nothing arrived before the timeout, or there is no data socket.
    NotReady,
    /// The peer closed the connection.
    Closed,
}

/// Owner of the listening and data sockets for one endpoint.
#[derive(Debug)]
pub struct SocketManager {
    endpoint: Endpoint,
    read_chunk: usize,
    connect_timeout: Duration,
    poll_slice: Duration,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    scratch: Vec<u8>,
}

impl SocketManager {
    pub fn new(endpoint: Endpoint, read_chunk_bytes: usize, timing: &TimingConfig) -> Self {
        let read_chunk = read_chunk_bytes.max(1);
        Self {
            endpoint,
            read_chunk,
            connect_timeout: timing.connect_timeout(),
            poll_slice: timing.shutdown_poll(),
            listener: None,
            stream: None,
            scratch: vec![0u8; read_chunk],
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// True when a data socket is established.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Local address of the listening socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    /// Creates the socket for the configured role.
    ///
    /// Server: binds and listens if no listener exists yet. Client: connects
    /// if no data socket exists yet. Already-open sockets are left alone.
    pub fn open(&mut self) -> Result<()> {
        match self.endpoint.connection_type {
            ConnectionType::Server => {
                if self.listener.is_none() {
                    let listener = self.bind_listener()?;
                    info!(
                        address = %self.endpoint.target(),
                        local = ?listener.local_addr().ok(),
                        "Listening for connections"
                    );
                    self.listener = Some(listener);
                }
            }
            ConnectionType::Client => {
                if self.stream.is_none() {
                    let stream = self.connect_stream()?;
                    info!(peer = %self.endpoint.target(), "Connected to peer");
                    self.stream = Some(stream);
                }
            }
        }
        Ok(())
    }

    fn bind_listener(&self) -> Result<TcpListener> {
        let target = self.endpoint.target();
        let mut addrs: Vec<SocketAddr> = (self.endpoint.bind_address.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|e| NetSourceError::bind(&target, e))?
            .collect();
        // "localhost" may resolve to ::1 first; peers expect the IPv4 loopback.
        addrs.sort_by_key(|addr| !addr.is_ipv4());

        let mut last_err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
        for addr in addrs {
            match listen_on(addr) {
                Ok(listener) => return Ok(listener),
                Err(e) => {
                    debug!(%addr, error = %e, "Bind attempt failed");
                    last_err = e;
                }
            }
        }
        Err(NetSourceError::bind(target, last_err))
    }

    fn connect_stream(&self) -> Result<TcpStream> {
        let target = self.endpoint.target();
        let addrs = (self.endpoint.ip_address.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|e| NetSourceError::connect(&target, e))?;

        let mut last_err = io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_nonblocking(true)
                        .map_err(|e| NetSourceError::connect(&target, e))?;
                    return Ok(stream);
                }
                Err(e) => last_err = e,
            }
        }
        Err(NetSourceError::connect(target, last_err))
    }

    /// Waits up to `timeout` for a pending connection and accepts it.
    ///
    /// Returns `Ok(false)` on timeout, on stop, or when there is no listener.
    /// A newly accepted connection replaces any previous data socket.
    pub fn accept(&mut self, timeout: Duration, stop: &AtomicBool) -> Result<bool> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(false);
        };

        if !wait_readable(listener.as_fd(), timeout, self.poll_slice, stop)? {
            return Ok(false);
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                if let Some(old) = self.stream.replace(stream) {
                    let _ = old.shutdown(Shutdown::Both);
                }
                info!(%peer, "Accepted connection");
                Ok(true)
            }
            Err(e) if is_transient(&e) => Ok(false),
            Err(e) => Err(NetSourceError::Io(e)),
        }
    }

    /// Waits up to `timeout` for data and appends at most one read chunk to
    /// `buf`.
    pub fn read_available(
        &mut self,
        buf: &mut Vec<u8>,
        timeout: Duration,
        stop: &AtomicBool,
    ) -> Result<ReadOutcome> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(ReadOutcome::NotReady);
        };

        if !wait_readable(stream.as_fd(), timeout, self.poll_slice, stop)? {
            return Ok(ReadOutcome::NotReady);
        }

        match stream.read(&mut self.scratch[..self.read_chunk]) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                buf.extend_from_slice(&self.scratch[..n]);
                Ok(ReadOutcome::Data(n))
            }
            Err(e) if is_transient(&e) => Ok(ReadOutcome::NotReady),
            Err(e) => Err(NetSourceError::Io(e)),
        }
    }

    /// Drops the data socket, keeping the listener.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(endpoint = %self.endpoint.target(), "Data socket closed");
        }
    }

    /// Shuts down and closes both sockets. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.disconnect();
        if self.listener.take().is_some() {
            debug!(endpoint = %self.endpoint.target(), "Listening socket closed");
        }
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn listen_on(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Polls `fd` for readability in `slice`-sized steps until `timeout`
/// elapses or `stop` is raised.
fn wait_readable(
    fd: BorrowedFd<'_>,
    timeout: Duration,
    slice: Duration,
    stop: &AtomicBool,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if stop.load(Ordering::Acquire) {
            return Ok(false);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let step = remaining.min(slice);
        let millis = u16::try_from(step.as_millis()).unwrap_or(u16::MAX);

        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(n) if n > 0 => return Ok(true),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => {
                warn!(error = %e, "poll failed");
                return Err(NetSourceError::Io(io::Error::from(e)));
            }
        }

        if remaining <= step {
            return Ok(false);
        }
    }
}
