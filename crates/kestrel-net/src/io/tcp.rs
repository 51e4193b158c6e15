//! Plain TCP transport built on non-blocking `socket2` sockets.
//!
//! Name resolution runs on a short-lived `kestrel-dns` thread so that
//! `connect_tick` never blocks; the result comes back over a channel owned
//! by the current attempt, so a stale lookup from an abandoned attempt has
//! nowhere to land.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

use super::{IoProgress, NetIo};
use crate::url::UrlParts;

/// TCP options applied to every outgoing connection.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm for lower latency. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Keepalive probe interval. Default: 10s.
    pub keepalive_interval: Duration,
    /// Give up on resolve + connect after this long. Default: 30s.
    pub connect_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Apply socket options to a freshly connected stream.
fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

enum TcpState {
    Idle,
    Resolving {
        rx: Receiver<io::Result<Vec<SocketAddr>>>,
    },
    Connecting {
        socket: Socket,
        remaining: VecDeque<SocketAddr>,
    },
    Connected(TcpStream),
}

/// Non-blocking TCP client socket.
pub struct TcpIo {
    config: SocketConfig,
    state: TcpState,
    deadline: Option<Instant>,
}

impl Default for TcpIo {
    fn default() -> Self {
        Self::new(SocketConfig::default())
    }
}

impl TcpIo {
    /// Create an idle transport.
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            state: TcpState::Idle,
            deadline: None,
        }
    }

    /// The connected stream, once `connect_tick` has reported `Done`.
    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        match &mut self.state {
            TcpState::Connected(stream) => Some(stream),
            _ => None,
        }
    }

    fn try_next_address(&mut self, mut remaining: VecDeque<SocketAddr>) -> IoProgress {
        while let Some(addr) = remaining.pop_front() {
            match start_connect(addr) {
                ConnectStart::Pending(socket) => {
                    self.state = TcpState::Connecting { socket, remaining };
                    return IoProgress::Again;
                }
                ConnectStart::Connected(stream) => return self.finish(stream),
                ConnectStart::Failed(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                }
            }
        }
        self.state = TcpState::Idle;
        IoProgress::Failed
    }

    fn finish(&mut self, stream: TcpStream) -> IoProgress {
        if let Err(e) = configure_stream(&stream, &self.config) {
            tracing::debug!(error = %e, "failed to apply socket options");
        }
        self.state = TcpState::Connected(stream);
        self.deadline = None;
        IoProgress::Done
    }
}

enum ConnectStart {
    Pending(Socket),
    Connected(TcpStream),
    Failed(io::Error),
}

fn start_connect(addr: SocketAddr) -> ConnectStart {
    let socket = match Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .and_then(|socket| socket.set_nonblocking(true).map(|()| socket))
    {
        Ok(socket) => socket,
        Err(e) => return ConnectStart::Failed(e),
    };

    match socket.connect(&addr.into()) {
        Ok(()) => ConnectStart::Connected(socket.into()),
        Err(e) if connect_in_progress(&e) => ConnectStart::Pending(socket),
        Err(e) => ConnectStart::Failed(e),
    }
}

fn connect_in_progress(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    err.kind() == io::ErrorKind::WouldBlock
}

/// `Ok(true)` once the pending connect has completed.
fn poll_connected(socket: &Socket) -> io::Result<bool> {
    if let Some(err) = socket.take_error()? {
        return Err(err);
    }
    match socket.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}

impl NetIo for TcpIo {
    fn connect_init(&mut self, url: &UrlParts) -> IoProgress {
        self.close();
        self.deadline = Some(Instant::now() + self.config.connect_timeout);
        let port = url.port_or_default();

        if let Ok(ip) = url.host.parse::<IpAddr>() {
            return self.try_next_address(VecDeque::from([SocketAddr::new(ip, port)]));
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let host = url.host.clone();
        let spawned = std::thread::Builder::new()
            .name("kestrel-dns".to_string())
            .spawn(move || {
                let result = (host.as_str(), port)
                    .to_socket_addrs()
                    .map(|addrs| addrs.collect::<Vec<_>>());
                // The attempt may have been abandoned; nobody is listening then.
                let _ = tx.send(result);
            });

        match spawned {
            Ok(_) => {
                self.state = TcpState::Resolving { rx };
                IoProgress::Again
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn resolver thread");
                IoProgress::Failed
            }
        }
    }

    fn connect_tick(&mut self) -> IoProgress {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            tracing::debug!(timeout = ?self.config.connect_timeout, "connect timed out");
            self.close();
            return IoProgress::Failed;
        }

        match std::mem::replace(&mut self.state, TcpState::Idle) {
            TcpState::Idle => IoProgress::Failed,
            TcpState::Resolving { rx } => match rx.try_recv() {
                Ok(Ok(addrs)) if !addrs.is_empty() => self.try_next_address(addrs.into()),
                Ok(Ok(_)) => {
                    tracing::debug!("host resolved to no addresses");
                    IoProgress::Failed
                }
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "host resolution failed");
                    IoProgress::Failed
                }
                Err(TryRecvError::Empty) => {
                    self.state = TcpState::Resolving { rx };
                    IoProgress::Again
                }
                Err(TryRecvError::Disconnected) => IoProgress::Failed,
            },
            TcpState::Connecting { socket, remaining } => match poll_connected(&socket) {
                Ok(true) => self.finish(socket.into()),
                Ok(false) => {
                    self.state = TcpState::Connecting { socket, remaining };
                    IoProgress::Again
                }
                Err(e) => {
                    tracing::debug!(error = %e, "connect failed, trying next address");
                    self.try_next_address(remaining)
                }
            },
            TcpState::Connected(stream) => {
                self.state = TcpState::Connected(stream);
                IoProgress::Done
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.stream_mut() {
            Some(stream) => stream.write(data),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream_mut() {
            Some(stream) => stream.read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn close(&mut self) {
        if let TcpState::Connected(stream) = &self.state {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.state = TcpState::Idle;
        self.deadline = None;
    }
}
