//! TLS over [`TcpIo`] using rustls with the webpki root store.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use super::{IoProgress, NetIo, SocketConfig, TcpIo};
use crate::url::UrlParts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Tcp,
    Handshake,
    Ready,
}

/// Non-blocking TLS client socket.
pub struct TlsIo {
    tcp: TcpIo,
    config: Option<Arc<ClientConfig>>,
    conn: Option<ClientConnection>,
    phase: Phase,
}

impl TlsIo {
    /// TLS with the bundled webpki roots.
    pub fn new(socket: SocketConfig) -> Self {
        Self {
            tcp: TcpIo::new(socket),
            config: None,
            conn: None,
            phase: Phase::Tcp,
        }
    }

    /// TLS with a caller-supplied rustls configuration.
    pub fn with_config(socket: SocketConfig, config: Arc<ClientConfig>) -> Self {
        Self {
            config: Some(config),
            ..Self::new(socket)
        }
    }

    fn client_config(&mut self) -> Result<Arc<ClientConfig>, rustls::Error> {
        if let Some(config) = &self.config {
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(default_client_config()?);
        self.config = Some(Arc::clone(&config));
        Ok(config)
    }

    fn drive_handshake(&mut self) -> IoProgress {
        let (Some(conn), Some(stream)) = (self.conn.as_mut(), self.tcp.stream_mut()) else {
            return IoProgress::Failed;
        };

        loop {
            if let Err(e) = flush_tls(conn, stream) {
                tracing::debug!(error = %e, "TLS write failed during handshake");
                return IoProgress::Failed;
            }
            if !conn.is_handshaking() {
                self.phase = Phase::Ready;
                return IoProgress::Done;
            }

            match conn.read_tls(stream) {
                Ok(0) => {
                    tracing::debug!("peer closed during TLS handshake");
                    return IoProgress::Failed;
                }
                Ok(_) => {
                    if let Err(e) = conn.process_new_packets() {
                        // Deliver the alert if the socket takes it.
                        let _ = flush_tls(conn, stream);
                        tracing::debug!(error = %e, "TLS handshake rejected");
                        return IoProgress::Failed;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return IoProgress::Again,
                Err(e) => {
                    tracing::debug!(error = %e, "TLS read failed during handshake");
                    return IoProgress::Failed;
                }
            }
        }
    }

    fn parts(&mut self) -> io::Result<(&mut ClientConnection, &mut TcpStream)> {
        match (self.phase, self.conn.as_mut(), self.tcp.stream_mut()) {
            (Phase::Ready, Some(conn), Some(stream)) => Ok((conn, stream)),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

/// rustls client config with the ring provider and webpki roots.
pub fn default_client_config() -> Result<ClientConfig, rustls::Error> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Ok(
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

fn flush_tls(conn: &mut ClientConnection, stream: &mut TcpStream) -> io::Result<()> {
    while conn.wants_write() {
        match conn.write_tls(stream) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl NetIo for TlsIo {
    fn connect_init(&mut self, url: &UrlParts) -> IoProgress {
        self.close();

        let config = match self.client_config() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "failed to build TLS configuration");
                return IoProgress::Failed;
            }
        };
        let conn = ServerName::try_from(url.host.clone())
            .map_err(|e| e.to_string())
            .and_then(|name| ClientConnection::new(config, name).map_err(|e| e.to_string()));
        match conn {
            Ok(conn) => self.conn = Some(conn),
            Err(e) => {
                tracing::debug!(host = %url.host, error = %e, "cannot start TLS session");
                return IoProgress::Failed;
            }
        }

        match self.tcp.connect_init(url) {
            // TCP finished synchronously; the handshake still has to run.
            IoProgress::Done => {
                self.phase = Phase::Handshake;
                IoProgress::Again
            }
            other => other,
        }
    }

    fn connect_tick(&mut self) -> IoProgress {
        match self.phase {
            Phase::Tcp => match self.tcp.connect_tick() {
                IoProgress::Done => {
                    self.phase = Phase::Handshake;
                    self.drive_handshake()
                }
                other => other,
            },
            Phase::Handshake => self.drive_handshake(),
            Phase::Ready => IoProgress::Done,
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let (conn, stream) = self.parts()?;
        let accepted = conn.writer().write(data)?;
        flush_tls(conn, stream)?;
        if accepted == 0 && !data.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(accepted)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (conn, stream) = self.parts()?;
        loop {
            match conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if conn.read_tls(stream)? == 0 {
                return Ok(0);
            }
            conn.process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            flush_tls(conn, stream)?;
        }
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.conn.take()
            && self.phase == Phase::Ready
            && let Some(stream) = self.tcp.stream_mut()
        {
            conn.send_close_notify();
            let _ = flush_tls(&mut conn, stream);
        }
        self.phase = Phase::Tcp;
        self.tcp.close();
    }
}
