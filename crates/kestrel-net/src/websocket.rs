//! WebSocket transport: a tick-driven state machine over a [`NetIo`].
//!
//! ```text
//! Disconnected -> Connecting -> HandshakeSending -> HandshakeReceiving -> Connected
//!       ^                                                                    |
//!       +------------- RemoteDisconnect <---- close frame received ----------+
//! ```
//!
//! Any I/O failure returns the machine to `Disconnected`. Several steps may
//! complete in one `tick`; each step either advances the state or reports
//! that it has to wait for the socket.

use std::io;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::frame::{FrameConfig, FrameDecoder, Incoming, OpCode, encode_client_frame, encode_close};
use crate::handshake::{build_upgrade_request, generate_client_key, parse_upgrade_response};
use crate::io::{IoProgress, NetIo, SchemeIo};
use crate::lifecycle::ActivityMonitor;
use crate::transport::{
    ConnectCycle, DisconnectCode, DisconnectInfo, EventQueue, RtTransport, TransportEvent,
    TransportHandler, TransportMode,
};
use crate::url::UrlParts;

/// Tuning knobs for [`WebSocketTransport`].
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Frame decoder limits.
    pub frame: FrameConfig,
    /// Bytes requested from the socket per read.
    pub read_chunk: usize,
    /// Reads attempted per tick before yielding.
    pub max_reads_per_tick: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            read_chunk: 16 * 1024,
            max_reads_per_tick: 64,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    /// No connection.
    Disconnected,
    /// Resolving and opening the socket.
    Connecting,
    /// Writing the upgrade request.
    HandshakeSending,
    /// Waiting for the upgrade response.
    HandshakeReceiving,
    /// Frames flow in both directions.
    Connected,
    /// The server sent a close frame; teardown in progress.
    RemoteDisconnect,
}

enum Step {
    Done,
    Again,
    Failed(String),
}

/// How the byte stream ended during a read pass.
enum StreamEnd {
    Eof,
    Failed(io::Error),
}

/// A WebSocket client transport.
pub struct WebSocketTransport<IO: NetIo> {
    io: IO,
    config: WebSocketConfig,
    clock: Arc<dyn Clock>,
    state: WsState,
    mode: TransportMode,
    cycle: ConnectCycle,
    last_cycle: ConnectCycle,
    client_key: String,
    handshake_out: Vec<u8>,
    handshake_sent: usize,
    handshake_in: Vec<u8>,
    decoder: FrameDecoder,
    outbound: Vec<u8>,
    read_buf: Vec<u8>,
    activity: ActivityMonitor,
    events: EventQueue,
}

impl WebSocketTransport<SchemeIo> {
    /// Transport over plain TCP or TLS, chosen from the URL scheme.
    pub fn with_defaults() -> Self {
        Self::new(SchemeIo::default(), WebSocketConfig::default(), SystemClock::shared())
    }
}

impl<IO: NetIo> WebSocketTransport<IO> {
    /// Create a disconnected transport.
    pub fn new(io: IO, config: WebSocketConfig, clock: Arc<dyn Clock>) -> Self {
        let decoder = FrameDecoder::new(config.frame.clone());
        let read_buf = vec![0; config.read_chunk.max(1)];
        Self {
            io,
            config,
            clock,
            state: WsState::Disconnected,
            mode: TransportMode::Text,
            cycle: ConnectCycle::NONE,
            last_cycle: ConnectCycle::NONE,
            client_key: String::new(),
            handshake_out: Vec::new(),
            handshake_sent: 0,
            handshake_in: Vec::new(),
            decoder,
            outbound: Vec::new(),
            read_buf,
            activity: ActivityMonitor::default(),
            events: EventQueue::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> WsState {
        self.state
    }

    /// Encoded bytes waiting for the socket to accept them.
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    fn reset_connection(&mut self) {
        self.client_key.clear();
        self.handshake_out.clear();
        self.handshake_sent = 0;
        self.handshake_in.clear();
        self.decoder.reset();
        self.outbound.clear();
    }

    fn push(&mut self, event: TransportEvent) {
        self.events.push(self.cycle, event);
    }

    fn advance_connect(&mut self, now: u64) {
        loop {
            let step = match self.state {
                WsState::Connecting => match self.io.connect_tick() {
                    IoProgress::Done => {
                        self.state = WsState::HandshakeSending;
                        Step::Done
                    }
                    IoProgress::Again => Step::Again,
                    IoProgress::Failed => Step::Failed("Failed connect".to_string()),
                },
                WsState::HandshakeSending => self.send_handshake(),
                WsState::HandshakeReceiving => self.receive_handshake(now),
                _ => return,
            };

            match step {
                Step::Done if self.state == WsState::Connected => return,
                Step::Done => continue,
                Step::Again => return,
                Step::Failed(reason) => {
                    tracing::warn!(%reason, cycle = %self.cycle, "connect attempt failed");
                    self.io.close();
                    self.state = WsState::Disconnected;
                    self.reset_connection();
                    self.push(TransportEvent::Error(reason));
                    return;
                }
            }
        }
    }

    fn send_handshake(&mut self) -> Step {
        while self.handshake_sent < self.handshake_out.len() {
            match self.io.send(&self.handshake_out[self.handshake_sent..]) {
                Ok(0) => return Step::Again,
                Ok(n) => self.handshake_sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Step::Again,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Step::Failed(format!("Failed HTTP handshake: {e}")),
            }
        }
        self.state = WsState::HandshakeReceiving;
        Step::Done
    }

    fn receive_handshake(&mut self, now: u64) -> Step {
        loop {
            match self.io.recv(&mut self.read_buf) {
                Ok(0) => {
                    return Step::Failed(
                        "Failed HTTP handshake: connection closed by server".to_string(),
                    );
                }
                Ok(n) => self.handshake_in.extend_from_slice(&self.read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Step::Again,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Step::Failed(format!("Failed HTTP handshake: {e}")),
            }

            match parse_upgrade_response(&self.handshake_in, &self.client_key) {
                Ok(Some(header_len)) => {
                    // Frames the server sent right behind its response.
                    self.decoder.push(&self.handshake_in[header_len..]);
                    self.handshake_in.clear();
                    self.state = WsState::Connected;
                    self.activity.touch(now);
                    tracing::info!(cycle = %self.cycle, "websocket connected");
                    self.push(TransportEvent::Connected);
                    return Step::Done;
                }
                Ok(None) => continue,
                Err(e) => return Step::Failed(format!("Failed HTTP handshake: {e}")),
            }
        }
    }

    fn service_connected(&mut self, now: u64) {
        // Bytes read before EOF or an error still belong to this cycle.
        let mut ended = None;
        for _ in 0..self.config.max_reads_per_tick {
            match self.io.recv(&mut self.read_buf) {
                Ok(0) => {
                    ended = Some(StreamEnd::Eof);
                    break;
                }
                Ok(n) => {
                    self.activity.touch(now);
                    self.decoder.push(&self.read_buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    ended = Some(StreamEnd::Failed(e));
                    break;
                }
            }
        }

        if !self.process_frames() {
            return;
        }

        match ended {
            Some(StreamEnd::Eof) => {
                self.finish_disconnect(DisconnectInfo::new(
                    DisconnectCode::AbnormalClosure,
                    "connection closed by server",
                    true,
                ));
                return;
            }
            Some(StreamEnd::Failed(e)) => {
                self.io_failure(e);
                return;
            }
            None => {}
        }

        if self.activity.is_expired(now) {
            let idle_ms = self.activity.idle_for(now);
            tracing::warn!(idle_ms, timeout_ms = self.activity.timeout(), "activity timeout");
            self.outbound.extend(encode_close(
                DisconnectCode::TransportError.as_u16(),
                "activity timeout",
            ));
            let _ = self.flush_outbound();
            self.finish_disconnect(DisconnectInfo::new(
                DisconnectCode::TransportError,
                "activity timeout",
                false,
            ));
            return;
        }

        if let Err(e) = self.flush_outbound() {
            self.io_failure(e);
        }
    }

    /// Decode buffered frames. Returns `false` once the connection ended.
    fn process_frames(&mut self) -> bool {
        loop {
            match self.decoder.next_frame() {
                Ok(None) => return true,
                Ok(Some(Incoming::Message(data))) => self.push(TransportEvent::Message(data)),
                Ok(Some(Incoming::Ping(payload))) => {
                    self.outbound.extend(encode_client_frame(OpCode::Pong, &payload));
                }
                Ok(Some(Incoming::Pong(_))) => {}
                Ok(Some(Incoming::Close { code, reason })) => {
                    self.state = WsState::RemoteDisconnect;
                    self.outbound.extend(encode_close(code.unwrap_or(1000), ""));
                    let _ = self.flush_outbound();
                    let code = code.map_or(DisconnectCode::NoStatus, DisconnectCode::from_u16);
                    tracing::info!(code = code.as_u16(), %reason, "server closed the connection");
                    self.finish_disconnect(DisconnectInfo::new(code, reason, true));
                    return false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "websocket protocol violation");
                    self.outbound.extend(encode_close(
                        DisconnectCode::ProtocolError.as_u16(),
                        "protocol error",
                    ));
                    let _ = self.flush_outbound();
                    self.push(TransportEvent::Error(format!("protocol error: {e}")));
                    self.finish_disconnect(DisconnectInfo::new(
                        DisconnectCode::ProtocolError,
                        e.to_string(),
                        false,
                    ));
                    return false;
                }
            }
        }
    }

    fn flush_outbound(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.io.send(&self.outbound) {
                Ok(0) => break,
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn io_failure(&mut self, error: io::Error) {
        tracing::warn!(%error, "websocket I/O error");
        self.push(TransportEvent::Error(error.to_string()));
        self.finish_disconnect(DisconnectInfo::new(
            DisconnectCode::AbnormalClosure,
            error.to_string(),
            false,
        ));
    }

    /// End an established connection and report it for the current cycle.
    fn finish_disconnect(&mut self, info: DisconnectInfo) {
        self.io.close();
        self.state = WsState::Disconnected;
        self.reset_connection();
        self.push(TransportEvent::Disconnected(info));
    }
}

impl<IO: NetIo> RtTransport for WebSocketTransport<IO> {
    fn connect(&mut self, url: &str, mode: TransportMode) {
        if self.is_connected() || self.is_connecting() {
            tracing::warn!(url, "connect ignored: connection already active");
            return;
        }

        self.reset_connection();
        self.last_cycle = self.last_cycle.next();
        self.cycle = self.last_cycle;
        self.mode = mode;

        let parts = match UrlParts::parse(url) {
            Ok(parts) => parts,
            Err(e) => {
                self.push(TransportEvent::Error(format!("Failed connect: {e}")));
                return;
            }
        };

        self.client_key = generate_client_key();
        self.handshake_out = build_upgrade_request(&parts, &self.client_key).into_bytes();
        tracing::debug!(cycle = %self.cycle, host = %parts.host, port = parts.port_or_default(), "connecting");

        match self.io.connect_init(&parts) {
            IoProgress::Failed => {
                self.io.close();
                self.reset_connection();
                self.push(TransportEvent::Error("Failed connect".to_string()));
            }
            IoProgress::Done => self.state = WsState::HandshakeSending,
            IoProgress::Again => self.state = WsState::Connecting,
        }
    }

    fn send(&mut self, data: &[u8]) -> bool {
        if self.state != WsState::Connected {
            return false;
        }
        let opcode = match self.mode {
            TransportMode::Text => OpCode::Text,
            TransportMode::Binary => OpCode::Binary,
        };
        self.outbound.extend(encode_client_frame(opcode, data));
        match self.flush_outbound() {
            Ok(()) => true,
            Err(e) => {
                self.io_failure(e);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if self.state == WsState::Connected {
            self.outbound
                .extend(encode_close(DisconnectCode::NormalClosure.as_u16(), ""));
            let _ = self.flush_outbound();
        }
        if self.state != WsState::Disconnected {
            tracing::debug!(cycle = %self.cycle, state = ?self.state, "disconnecting");
        }
        self.io.close();
        self.state = WsState::Disconnected;
        self.cycle = ConnectCycle::NONE;
        self.reset_connection();
    }

    fn tick(&mut self, handler: &mut dyn TransportHandler) {
        let now = self.clock.now_ms();
        if matches!(
            self.state,
            WsState::Connecting | WsState::HandshakeSending | WsState::HandshakeReceiving
        ) {
            self.advance_connect(now);
        }
        if self.state == WsState::Connected {
            self.service_connected(now);
        }
        self.events.dispatch(self.cycle, handler);
    }

    fn set_activity_timeout(&mut self, timeout_ms: u32) {
        self.activity.set_timeout(timeout_ms);
    }

    fn activity_timeout(&self) -> u32 {
        self.activity.timeout()
    }

    fn is_connected(&self) -> bool {
        self.state == WsState::Connected
    }

    fn is_connecting(&self) -> bool {
        matches!(
            self.state,
            WsState::Connecting | WsState::HandshakeSending | WsState::HandshakeReceiving
        )
    }
}

impl<IO: NetIo> Drop for WebSocketTransport<IO> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::io::scripted::{HandshakeReply, ScriptHandle, ScriptedIo, scripted, server_frame};

    const URL: &str = "ws://127.0.0.1:7350/ws?token=abc";

    fn transport() -> (WebSocketTransport<ScriptedIo>, ScriptHandle, ManualClock) {
        let (io, handle) = scripted();
        let clock = ManualClock::new(1_000);
        let ws = WebSocketTransport::new(io, WebSocketConfig::default(), Arc::new(clock.clone()));
        (ws, handle, clock)
    }

    fn tick(ws: &mut WebSocketTransport<ScriptedIo>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        ws.tick(&mut events);
        events
    }

    fn connected() -> (WebSocketTransport<ScriptedIo>, ScriptHandle, ManualClock) {
        let (mut ws, handle, clock) = transport();
        ws.connect(URL, TransportMode::Text);
        assert_eq!(tick(&mut ws), vec![TransportEvent::Connected]);
        handle.take_client_frames();
        (ws, handle, clock)
    }

    fn disconnected(events: &[TransportEvent]) -> Vec<&DisconnectInfo> {
        events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Disconnected(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_connect_completes_on_tick() {
        let (mut ws, handle, _) = transport();
        ws.connect(URL, TransportMode::Text);
        assert!(ws.is_connecting());
        assert!(!ws.is_connected());

        assert_eq!(tick(&mut ws), vec![TransportEvent::Connected]);
        assert!(ws.is_connected());

        let state = handle.state();
        let request = state.request.as_deref().unwrap();
        assert!(request.starts_with("GET /ws?token=abc HTTP/1.1\r\n"));
        assert!(request.contains("Host: 127.0.0.1:7350\r\n"));
    }

    #[test]
    fn test_connect_waits_for_socket() {
        let (mut ws, handle, _) = transport();
        handle.state().connect_ready = false;
        ws.connect(URL, TransportMode::Text);

        assert!(tick(&mut ws).is_empty());
        assert_eq!(ws.state(), WsState::Connecting);

        handle.state().connect_ready = true;
        assert_eq!(tick(&mut ws), vec![TransportEvent::Connected]);
    }

    #[test]
    fn test_frames_behind_handshake_follow_connected() {
        let (mut ws, handle, _) = transport();
        handle.state().reply = HandshakeReply::Accept(server_frame(0x1, b"welcome"));
        ws.connect(URL, TransportMode::Text);

        assert_eq!(
            tick(&mut ws),
            vec![
                TransportEvent::Connected,
                TransportEvent::Message(b"welcome".to_vec())
            ]
        );
    }

    #[test]
    fn test_wrong_accept_key_fails_connect() {
        let (mut ws, handle, _) = transport();
        handle.state().reply = HandshakeReply::WrongKey;
        ws.connect(URL, TransportMode::Text);

        let events = tick(&mut ws);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TransportEvent::Error(e) if e.starts_with("Failed HTTP handshake")
        ));
        assert!(!ws.is_connected());
        assert_eq!(ws.state(), WsState::Disconnected);
        assert_eq!(handle.state().closes, 1);

        // No retry happens on its own.
        assert!(tick(&mut ws).is_empty());
        assert_eq!(handle.state().attempts, 1);
    }

    #[test]
    fn test_rejected_upgrade_fails_connect() {
        let (mut ws, handle, _) = transport();
        handle.state().reply = HandshakeReply::Status(403);
        ws.connect(URL, TransportMode::Text);

        let events = tick(&mut ws);
        assert!(matches!(&events[..], [TransportEvent::Error(e)] if e.contains("403")));
    }

    #[test]
    fn test_socket_failure_reports_failed_connect() {
        let (mut ws, handle, _) = transport();
        handle.state().connect_fails = true;
        ws.connect(URL, TransportMode::Text);
        assert_eq!(
            tick(&mut ws),
            vec![TransportEvent::Error("Failed connect".to_string())]
        );
        assert!(!ws.is_connecting());
    }

    #[test]
    fn test_bad_url_reported_on_tick() {
        let (mut ws, handle, _) = transport();
        ws.connect("not a url", TransportMode::Text);
        assert!(!ws.is_connecting());
        assert_eq!(handle.state().attempts, 0);

        let events = tick(&mut ws);
        assert!(matches!(&events[..], [TransportEvent::Error(e)] if e.starts_with("Failed connect")));
    }

    #[test]
    fn test_send_requires_connection() {
        let (mut ws, _, _) = transport();
        assert!(!ws.send(b"hello"));
    }

    #[test]
    fn test_send_uses_mode_opcode() {
        let (mut ws, handle, _) = connected();
        assert!(ws.send(b"{\"ping\":{}}"));
        assert_eq!(
            handle.take_client_frames(),
            vec![(0x1, b"{\"ping\":{}}".to_vec())]
        );
        ws.disconnect();

        ws.connect(URL, TransportMode::Binary);
        tick(&mut ws);
        handle.take_client_frames();
        assert!(ws.send(&[1, 2, 3]));
        assert_eq!(handle.take_client_frames(), vec![(0x2, vec![1, 2, 3])]);
    }

    #[test]
    fn test_send_survives_backpressure() {
        let (mut ws, handle, _) = connected();
        handle.state().send_capacity = Some(3);
        assert!(ws.send(b"abcdef"));
        assert!(ws.pending_outbound() > 0);

        handle.state().send_capacity = None;
        tick(&mut ws);
        assert_eq!(ws.pending_outbound(), 0);
        assert_eq!(handle.take_client_frames(), vec![(0x1, b"abcdef".to_vec())]);
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let (mut ws, handle, _) = connected();
        handle.push_frame(0x9, b"keepalive");
        assert!(tick(&mut ws).is_empty());
        assert_eq!(
            handle.take_client_frames(),
            vec![(0xA, b"keepalive".to_vec())]
        );
    }

    #[test]
    fn test_remote_close_is_flagged_remote() {
        let (mut ws, handle, _) = connected();
        handle.push_frame(0x1, b"last words");
        handle.push_close(1001, "restarting");

        let events = tick(&mut ws);
        assert_eq!(
            events,
            vec![
                TransportEvent::Message(b"last words".to_vec()),
                TransportEvent::Disconnected(DisconnectInfo::new(
                    DisconnectCode::GoingAway,
                    "restarting",
                    true
                )),
            ]
        );
        assert!(!ws.is_connected());

        let frames = handle.take_client_frames();
        assert_eq!(frames[0].0, 0x8);
        assert_eq!(&frames[0].1[..2], &1001u16.to_be_bytes());
    }

    #[test]
    fn test_peer_eof_is_abnormal_remote_closure() {
        let (mut ws, handle, _) = connected();
        handle.state().peer_closed = true;
        let events = tick(&mut ws);
        let infos = disconnected(&events);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].code, DisconnectCode::AbnormalClosure);
        assert!(infos[0].remote);
    }

    #[test]
    fn test_frames_before_eof_are_delivered_first() {
        let (mut ws, handle, _) = connected();
        handle.push_frame(0x1, b"last words");
        handle.state().peer_closed = true;

        let events = tick(&mut ws);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], TransportEvent::Message(b"last words".to_vec()));
        assert!(matches!(
            &events[1],
            TransportEvent::Disconnected(info)
                if info.code == DisconnectCode::AbnormalClosure && info.remote
        ));
    }

    #[test]
    fn test_frames_before_io_error_are_delivered_first() {
        let (mut ws, handle, _) = connected();
        handle.push_frame(0x1, b"one");
        handle.push_frame(0x2, b"two");
        handle.state().recv_error = Some(io::ErrorKind::ConnectionReset);

        let events = tick(&mut ws);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], TransportEvent::Message(b"one".to_vec()));
        assert_eq!(events[1], TransportEvent::Message(b"two".to_vec()));
        assert!(matches!(events[2], TransportEvent::Error(_)));
        assert!(matches!(&events[3], TransportEvent::Disconnected(info) if !info.remote));
        assert!(tick(&mut ws).is_empty());
    }

    #[test]
    fn test_io_error_reports_error_then_disconnect() {
        let (mut ws, handle, _) = connected();
        handle.state().recv_error = Some(io::ErrorKind::ConnectionReset);
        let events = tick(&mut ws);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TransportEvent::Error(_)));
        assert!(matches!(
            &events[1],
            TransportEvent::Disconnected(info) if !info.remote
        ));
    }

    #[test]
    fn test_protocol_violation_closes_with_1002() {
        let (mut ws, handle, _) = connected();
        // Masked frames are not allowed from a server.
        handle.state().inbound.extend([0x81, 0x81, 1, 2, 3, 4, b'x']);
        let events = tick(&mut ws);
        let infos = disconnected(&events);
        assert_eq!(infos[0].code, DisconnectCode::ProtocolError);
        let frames = handle.take_client_frames();
        assert_eq!(frames[0].0, 0x8);
        assert_eq!(&frames[0].1[..2], &1002u16.to_be_bytes());
    }

    #[test]
    fn test_activity_timeout_disconnects_exactly_once() {
        let (mut ws, _, clock) = connected();
        ws.set_activity_timeout(5_000);
        assert_eq!(ws.activity_timeout(), 5_000);

        let mut all = Vec::new();
        for _ in 0..4 {
            clock.advance(1_000);
            all.extend(tick(&mut ws));
        }
        assert!(all.is_empty());

        for _ in 0..5 {
            clock.advance(1_000);
            all.extend(tick(&mut ws));
        }
        let infos = disconnected(&all);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].code, DisconnectCode::TransportError);
        assert!(!infos[0].remote);
        assert!(!ws.is_connected());
    }

    #[test]
    fn test_inbound_traffic_resets_activity_timer() {
        let (mut ws, handle, clock) = connected();
        ws.set_activity_timeout(1_000);

        for _ in 0..5 {
            clock.advance(800);
            handle.push_frame(0xA, b"");
            assert!(tick(&mut ws).is_empty());
        }
        assert!(ws.is_connected());
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let (mut ws, _, clock) = connected();
        ws.set_activity_timeout(0);
        clock.advance(10_000_000);
        assert!(tick(&mut ws).is_empty());
        assert!(ws.is_connected());
    }

    #[test]
    fn test_disconnect_is_idempotent_and_silent() {
        let (mut ws, handle, _) = connected();
        ws.disconnect();
        ws.disconnect();

        assert!(tick(&mut ws).is_empty());
        assert_eq!(handle.state().closes, 1);
        let frames = handle.take_client_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, 0x8);
    }

    #[test]
    fn test_disconnect_drops_undelivered_events() {
        let (mut ws, _, _) = transport();
        ws.connect("missing-scheme", TransportMode::Text);
        ws.disconnect();
        assert!(tick(&mut ws).is_empty());
    }

    #[test]
    fn test_late_connect_completion_is_suppressed() {
        let (mut ws, handle, _) = transport();
        handle.state().connect_ready = false;
        ws.connect(URL, TransportMode::Text);
        assert!(tick(&mut ws).is_empty());

        ws.disconnect();
        handle.state().connect_ready = true;
        assert!(tick(&mut ws).is_empty());
        assert!(tick(&mut ws).is_empty());
        assert!(!ws.is_connected());
    }

    #[test]
    fn test_reconnect_delivers_only_second_cycle() {
        let (mut ws, handle, _) = transport();
        handle.state().connect_ready = false;
        ws.connect("bogus", TransportMode::Text);
        ws.disconnect();
        ws.connect(URL, TransportMode::Text);
        ws.disconnect();
        ws.connect(URL, TransportMode::Text);
        handle.state().connect_ready = true;

        assert_eq!(tick(&mut ws), vec![TransportEvent::Connected]);
        assert_eq!(handle.state().attempts, 2);
        assert!(tick(&mut ws).is_empty());
    }

    #[test]
    fn test_reconnect_after_remote_close() {
        let (mut ws, handle, _) = connected();
        handle.push_close(1000, "");
        assert_eq!(disconnected(&tick(&mut ws)).len(), 1);

        ws.connect(URL, TransportMode::Text);
        assert_eq!(tick(&mut ws), vec![TransportEvent::Connected]);
    }

    #[test]
    fn test_connect_while_active_is_ignored() {
        let (mut ws, handle, _) = connected();
        ws.connect(URL, TransportMode::Text);
        assert_eq!(handle.state().attempts, 1);
        assert!(ws.is_connected());
    }

    #[test]
    fn test_empty_close_reports_no_status() {
        let (mut ws, handle, _) = connected();
        handle.push_frame(0x8, b"");
        let events = tick(&mut ws);
        assert_eq!(disconnected(&events)[0].code, DisconnectCode::NoStatus);
    }
}
