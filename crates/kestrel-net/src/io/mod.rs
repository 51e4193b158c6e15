//! Non-blocking byte transports underneath the WebSocket state machine.
//!
//! A [`NetIo`] is driven entirely by polling: `connect_init` starts an
//! attempt, `connect_tick` advances it, and `send`/`recv` never block. Each
//! call reports progress as [`IoProgress`] or, for data transfer, as an
//! `io::Result` where `WouldBlock` means "try again next tick".

mod tcp;
#[cfg(feature = "tls")]
mod tls;

#[cfg(test)]
pub(crate) mod scripted;

use std::io;

pub use tcp::{SocketConfig, TcpIo};
#[cfg(feature = "tls")]
pub use tls::TlsIo;

use crate::url::UrlParts;

/// Outcome of one non-blocking step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoProgress {
    /// The step finished; move to the next one.
    Done,
    /// Nothing more can happen until the socket is ready again.
    Again,
    /// The step failed and the attempt is over.
    Failed,
}

/// A polled, non-blocking byte stream.
pub trait NetIo: Send {
    /// Begin connecting to `url`'s host and port.
    fn connect_init(&mut self, url: &UrlParts) -> IoProgress;

    /// Advance a connection attempt started by `connect_init`.
    fn connect_tick(&mut self) -> IoProgress;

    /// Write as much of `data` as the socket accepts right now.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read available bytes. `Ok(0)` means the peer closed the stream.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the socket. Safe to call in any state, any number of times.
    fn close(&mut self);
}

/// Picks plain TCP or TLS per connection from the URL scheme.
#[derive(Default)]
pub struct SchemeIo {
    socket: SocketConfig,
    active: Option<Box<dyn NetIo>>,
}

impl SchemeIo {
    /// Create with the socket options applied to every connection.
    pub fn new(socket: SocketConfig) -> Self {
        Self {
            socket,
            active: None,
        }
    }
}

impl NetIo for SchemeIo {
    fn connect_init(&mut self, url: &UrlParts) -> IoProgress {
        self.close();
        let mut io: Box<dyn NetIo> = if url.is_secure() {
            #[cfg(feature = "tls")]
            {
                Box::new(TlsIo::new(self.socket.clone()))
            }
            #[cfg(not(feature = "tls"))]
            {
                tracing::error!(scheme = %url.scheme, "TLS support not compiled in");
                return IoProgress::Failed;
            }
        } else {
            Box::new(TcpIo::new(self.socket.clone()))
        };
        let progress = io.connect_init(url);
        self.active = Some(io);
        progress
    }

    fn connect_tick(&mut self) -> IoProgress {
        match self.active.as_mut() {
            Some(io) => io.connect_tick(),
            None => IoProgress::Failed,
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.active.as_mut() {
            Some(io) => io.send(data),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.active.as_mut() {
            Some(io) => io.recv(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn close(&mut self) {
        if let Some(mut io) = self.active.take() {
            io.close();
        }
    }
}
