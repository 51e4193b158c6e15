//! The realtime transport contract.
//!
//! A transport is connected with [`RtTransport::connect`] and then pumped
//! with [`RtTransport::tick`]; every callback is delivered from inside
//! `tick`, on the caller's thread. `connect` and `disconnect` never invoke
//! callbacks themselves.

use std::collections::VecDeque;
use std::fmt;

/// Payload framing for outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Text frames (JSON envelopes).
    #[default]
    Text,
    /// Binary frames.
    Binary,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCode {
    /// 1000: orderly shutdown.
    NormalClosure,
    /// 1001: endpoint going away.
    GoingAway,
    /// 1002: protocol violation.
    ProtocolError,
    /// 1005: close frame carried no status.
    NoStatus,
    /// 1006: connection dropped without a close frame.
    AbnormalClosure,
    /// 4000: heartbeat pings went unanswered.
    HeartbeatFailure,
    /// 4001: the transport failed or timed out.
    TransportError,
    /// Any other status the server chose.
    Other(u16),
}

impl DisconnectCode {
    /// Numeric status code.
    pub fn as_u16(self) -> u16 {
        match self {
            DisconnectCode::NormalClosure => 1000,
            DisconnectCode::GoingAway => 1001,
            DisconnectCode::ProtocolError => 1002,
            DisconnectCode::NoStatus => 1005,
            DisconnectCode::AbnormalClosure => 1006,
            DisconnectCode::HeartbeatFailure => 4000,
            DisconnectCode::TransportError => 4001,
            DisconnectCode::Other(code) => code,
        }
    }

    /// Classify a numeric status code.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => DisconnectCode::NormalClosure,
            1001 => DisconnectCode::GoingAway,
            1002 => DisconnectCode::ProtocolError,
            1005 => DisconnectCode::NoStatus,
            1006 => DisconnectCode::AbnormalClosure,
            4000 => DisconnectCode::HeartbeatFailure,
            4001 => DisconnectCode::TransportError,
            other => DisconnectCode::Other(other),
        }
    }
}

/// Details passed to `on_disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    /// Close status.
    pub code: DisconnectCode,
    /// Reason text; may be empty.
    pub reason: String,
    /// `true` when the server ended the connection.
    pub remote: bool,
}

impl DisconnectInfo {
    /// Build a disconnect record.
    pub fn new(code: DisconnectCode, reason: impl Into<String>, remote: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            remote,
        }
    }
}

impl fmt::Display for DisconnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}){}",
            self.code.as_u16(),
            self.reason,
            if self.remote { " by server" } else { "" }
        )
    }
}

/// Receiver for transport callbacks.
pub trait TransportHandler {
    /// The upgrade completed; `send` now succeeds.
    fn on_connected(&mut self);
    /// An established connection ended.
    fn on_disconnected(&mut self, info: &DisconnectInfo);
    /// Connect failure or I/O error.
    fn on_error(&mut self, description: &str);
    /// A complete inbound message.
    fn on_message(&mut self, data: &[u8]);
}

/// A callback captured as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// See [`TransportHandler::on_connected`].
    Connected,
    /// See [`TransportHandler::on_disconnected`].
    Disconnected(DisconnectInfo),
    /// See [`TransportHandler::on_error`].
    Error(String),
    /// See [`TransportHandler::on_message`].
    Message(Vec<u8>),
}

impl TransportEvent {
    /// Deliver this event to `handler`.
    pub fn dispatch(&self, handler: &mut dyn TransportHandler) {
        match self {
            TransportEvent::Connected => handler.on_connected(),
            TransportEvent::Disconnected(info) => handler.on_disconnected(info),
            TransportEvent::Error(description) => handler.on_error(description),
            TransportEvent::Message(data) => handler.on_message(data),
        }
    }
}

/// Collecting events into a `Vec` lets an owner process them after `tick`
/// returns, free to call back into the transport.
impl TransportHandler for Vec<TransportEvent> {
    fn on_connected(&mut self) {
        self.push(TransportEvent::Connected);
    }

    fn on_disconnected(&mut self, info: &DisconnectInfo) {
        self.push(TransportEvent::Disconnected(info.clone()));
    }

    fn on_error(&mut self, description: &str) {
        self.push(TransportEvent::Error(description.to_string()));
    }

    fn on_message(&mut self, data: &[u8]) {
        self.push(TransportEvent::Message(data.to_vec()));
    }
}

/// A realtime connection driven by `tick`.
pub trait RtTransport: Send {
    /// Start connecting. Outcome is reported from a later `tick`.
    fn connect(&mut self, url: &str, mode: TransportMode);

    /// Queue one message. `false` when not connected.
    fn send(&mut self, data: &[u8]) -> bool;

    /// Close the connection. Idempotent, and silent: no callbacks follow,
    /// including ones for events already produced but not yet delivered.
    fn disconnect(&mut self);

    /// Make progress and deliver pending callbacks.
    fn tick(&mut self, handler: &mut dyn TransportHandler);

    /// Drop the connection if nothing arrives for `timeout_ms`. 0 disables.
    fn set_activity_timeout(&mut self, timeout_ms: u32);

    /// Current activity timeout in milliseconds.
    fn activity_timeout(&self) -> u32;

    /// Whether the connection is fully established.
    fn is_connected(&self) -> bool;

    /// Whether a connection attempt is in flight.
    fn is_connecting(&self) -> bool;
}

/// Identifies one connection attempt. Events carry the cycle they were
/// produced in and are dropped if the transport has since moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectCycle(u64);

impl ConnectCycle {
    /// Cycle in effect before any connect, and after a disconnect.
    pub const NONE: ConnectCycle = ConnectCycle(0);

    /// The cycle after this one.
    pub fn next(self) -> Self {
        ConnectCycle(self.0 + 1)
    }
}

impl fmt::Display for ConnectCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events awaiting delivery, tagged by connection cycle.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<(ConnectCycle, TransportEvent)>,
}

impl EventQueue {
    /// Record an event produced during `cycle`.
    pub fn push(&mut self, cycle: ConnectCycle, event: TransportEvent) {
        self.events.push_back((cycle, event));
    }

    /// Deliver queued events for `current` in order; drop the rest.
    pub fn dispatch(&mut self, current: ConnectCycle, handler: &mut dyn TransportHandler) -> usize {
        let mut delivered = 0;
        while let Some((cycle, event)) = self.events.pop_front() {
            if cycle != current {
                tracing::debug!(%cycle, %current, ?event, "dropping event from stale connection");
                continue;
            }
            event.dispatch(handler);
            delivered += 1;
        }
        delivered
    }

    /// Number of undelivered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
