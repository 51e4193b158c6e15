//! Realtime client: JSON envelopes over an [`RtTransport`].
//!
//! Requests carry a `cid` field holding their [`RequestTag`]; the server
//! echoes it in the response. Envelopes without a `cid` are server pushes
//! and go to the [`RtClientListener`]. Everything, listener callbacks and
//! request continuations alike, is delivered from [`RtClient::tick`].

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde_json::{Value, json};

use kestrel_config::RealtimeConfig;

use crate::client::ClientParams;
use crate::clock::Clock;
use crate::completion::Completion;
use crate::error::{ClientError, ErrorKind};
use crate::lifecycle::{ConnectNotifier, ConnectWaiter, Heartbeat, HeartbeatAction, connect_waiter};
use crate::pump::{self, PumpReport};
use crate::registry::{Continuation, PendingRequests, RequestTag, TagPolicy};
use crate::transport::{DisconnectCode, DisconnectInfo, RtTransport, TransportEvent, TransportMode};
use crate::url::url_encode;

/// Receiver for realtime connection events and server pushes.
pub trait RtClientListener: Send {
    /// The realtime socket finished its upgrade.
    fn on_connect(&mut self) {}

    /// The connection ended; `info.remote` tells who closed it.
    fn on_disconnect(&mut self, _info: &DisconnectInfo) {}

    /// Connection failures, server errors without a `cid`, and request
    /// errors that had no continuation.
    fn on_error(&mut self, _error: &ClientError) {}

    /// An envelope the server sent on its own initiative.
    fn on_push(&mut self, _envelope: &Value) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default)]
pub struct NoopListener;

impl RtClientListener for NoopListener {}

/// Realtime options, usually taken from the `realtime` config section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtOptions {
    pub activity_timeout_ms: u32,
    pub heartbeat_interval_ms: Option<u64>,
    pub create_status: bool,
}

impl Default for RtOptions {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for RtOptions {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            activity_timeout_ms: config.activity_timeout_ms,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            create_status: config.create_status,
        }
    }
}

/// Realtime client.
pub struct RtClient {
    params: ClientParams,
    options: RtOptions,
    transport: Box<dyn RtTransport>,
    listener: Box<dyn RtClientListener>,
    clock: Arc<dyn Clock>,
    requests: PendingRequests<Value>,
    unclaimed: Receiver<ClientError>,
    inbound: VecDeque<Completion<Value>>,
    heartbeat: Heartbeat,
    heartbeat_tag: Option<RequestTag>,
    connected: bool,
    notifier: Option<ConnectNotifier>,
    pending_disconnect: Option<DisconnectInfo>,
}

impl RtClient {
    /// Client speaking through `transport`.
    pub fn new(
        params: ClientParams,
        options: RtOptions,
        transport: Box<dyn RtTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (errors_tx, errors_rx) = crossbeam_channel::unbounded();
        let mut requests = PendingRequests::new(TagPolicy::CompactWhenIdle);
        requests.set_default_error_handler(Box::new(move |error| {
            let _ = errors_tx.send(error.clone());
        }));

        Self {
            heartbeat: Heartbeat::new(options.heartbeat_interval_ms),
            params,
            options,
            transport,
            listener: Box::new(NoopListener),
            clock,
            requests,
            unclaimed: errors_rx,
            inbound: VecDeque::new(),
            heartbeat_tag: None,
            connected: false,
            notifier: None,
            pending_disconnect: None,
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn RtClientListener>) {
        self.listener = listener;
    }

    pub fn options(&self) -> &RtOptions {
        &self.options
    }

    /// Connect with a session token. The returned waiter settles once the
    /// attempt succeeds or fails.
    pub fn connect(&mut self, token: &str) -> ConnectWaiter {
        let (notifier, waiter) = connect_waiter();
        if self.transport.is_connected() || self.transport.is_connecting() {
            tracing::warn!("realtime connect ignored: already connected or connecting");
            notifier.settle(Err(ClientError::connection("already connected or connecting")));
            return waiter;
        }

        if let Some(previous) = self.notifier.take() {
            previous.settle(Err(ClientError::cancelled("superseded by a new connect")));
        }

        let url = format!(
            "{}/ws?lang=en&status={}&token={}",
            self.params.ws_base_uri(),
            self.options.create_status,
            url_encode(token)
        );
        tracing::info!(host = %self.params.host, port = self.params.port, ssl = self.params.ssl, "realtime connecting");

        self.heartbeat.reset(self.clock.now_ms());
        self.transport.set_activity_timeout(self.options.activity_timeout_ms);
        self.transport.connect(&url, TransportMode::Text);
        self.notifier = Some(notifier);
        waiter
    }

    /// Close the connection and cancel every outstanding request.
    ///
    /// Continuations receive [`ErrorKind::CancelledByUser`] before this
    /// returns. If the client was connected, `on_disconnect` follows on the
    /// next tick, once. Returns how many requests were cancelled.
    pub fn disconnect(&mut self) -> usize {
        self.transport.disconnect();
        self.inbound.clear();
        self.heartbeat_tag = None;
        self.heartbeat.stop();
        let cancelled = self.requests.cancel_all("disconnected");

        if let Some(notifier) = self.notifier.take() {
            notifier.settle(Err(ClientError::cancelled("disconnected while connecting")));
        }
        if self.connected {
            self.connected = false;
            self.pending_disconnect = Some(DisconnectInfo::new(
                DisconnectCode::NormalClosure,
                "disconnected by client",
                false,
            ));
        }
        cancelled
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.transport.is_connecting()
    }

    /// Requests sent and not yet answered.
    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    /// Send an envelope that expects a response. A `cid` is added; the
    /// outcome reaches `on_done` from a later tick. Without `on_done`,
    /// errors go to the listener.
    pub fn send_request(&mut self, envelope: Value, on_done: Option<Continuation<Value>>) -> RequestTag {
        let tag = self.requests.create(on_done);

        let Value::Object(mut fields) = envelope else {
            self.defer(tag, Err(ClientError::new(ErrorKind::InvalidArgument, "envelope must be a JSON object")));
            return tag;
        };
        fields.insert("cid".to_string(), Value::String(tag.to_string()));

        if !self.transport.is_connected() {
            self.defer(tag, Err(ClientError::connection("Not connected")));
            return tag;
        }

        match serde_json::to_vec(&fields) {
            Ok(bytes) if self.transport.send(&bytes) => {
                self.heartbeat.message_sent(self.clock.now_ms());
            }
            Ok(_) => {
                self.defer(tag, Err(ClientError::transport("Send message failed")));
                self.drop_connection(DisconnectInfo::new(
                    DisconnectCode::TransportError,
                    "send message failed",
                    false,
                ));
            }
            Err(e) => self.defer(tag, Err(ClientError::internal(format!("serialize message failed: {e}")))),
        }
        tag
    }

    /// Send an envelope that gets no response. Returns `false` when it
    /// could not be sent.
    pub fn send(&mut self, envelope: &Value) -> bool {
        if !self.transport.is_connected() {
            tracing::error!("not connected");
            return false;
        }
        let bytes = match serde_json::to_vec(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "serialize message failed");
                return false;
            }
        };
        if self.transport.send(&bytes) {
            self.heartbeat.message_sent(self.clock.now_ms());
            true
        } else {
            self.drop_connection(DisconnectInfo::new(
                DisconnectCode::TransportError,
                "send message failed",
                false,
            ));
            false
        }
    }

    /// Application-level ping; resolves when the server answers.
    pub fn ping(&mut self, on_done: Option<Continuation<Value>>) -> RequestTag {
        self.send_request(json!({ "ping": {} }), on_done)
    }

    /// Pump the transport and deliver everything that is due.
    pub fn tick(&mut self) -> PumpReport {
        let mut report = PumpReport::default();

        if let Some(info) = self.pending_disconnect.take() {
            report += self.teardown(info);
        }

        let mut events: Vec<TransportEvent> = Vec::new();
        self.transport.tick(&mut events);
        for event in events {
            match event {
                TransportEvent::Connected => self.handle_connected(),
                TransportEvent::Message(data) => report += self.route_message(&data),
                TransportEvent::Error(description) => self.handle_error(description),
                TransportEvent::Disconnected(info) => {
                    tracing::info!(%info, "realtime disconnected");
                    report += self.teardown(info);
                }
            }
        }

        report += self.pump();
        self.deliver_unclaimed();
        self.drive_heartbeat();
        report
    }

    fn defer(&mut self, tag: RequestTag, outcome: Result<Value, ClientError>) {
        self.inbound.push_back(Completion::Request { tag, outcome });
    }

    fn pump(&mut self) -> PumpReport {
        let report = pump::drain(&mut self.inbound, &mut self.requests, |completion| {
            tracing::debug!(?completion, "ignoring non-request completion");
        });
        self.deliver_unclaimed();
        report
    }

    fn deliver_unclaimed(&mut self) {
        while let Ok(error) = self.unclaimed.try_recv() {
            self.listener.on_error(&error);
        }
    }

    fn handle_connected(&mut self) {
        tracing::info!("realtime connected");
        self.connected = true;
        self.heartbeat.reset(self.clock.now_ms());
        if let Some(notifier) = self.notifier.take() {
            notifier.settle(Ok(()));
        }
        self.listener.on_connect();
    }

    fn handle_error(&mut self, description: String) {
        let error = if self.connected {
            ClientError::transport(description)
        } else {
            ClientError::connection(description)
        };
        tracing::warn!(%error, "realtime transport error");
        if !self.connected
            && let Some(notifier) = self.notifier.take()
        {
            notifier.settle(Err(error.clone()));
        }
        self.listener.on_error(&error);
    }

    fn route_message(&mut self, data: &[u8]) -> PumpReport {
        let envelope: Value = match serde_json::from_slice(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "parse message failed");
                return PumpReport::default();
            }
        };

        let cid = match envelope.get("cid") {
            None => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => match s.parse::<u64>() {
                Ok(raw) => Some(raw),
                Err(_) => {
                    tracing::error!(cid = %s, "malformed cid");
                    return PumpReport::default();
                }
            },
            Some(other) => match other.as_u64() {
                Some(raw) => Some(raw),
                None => {
                    tracing::error!(cid = %other, "malformed cid");
                    return PumpReport::default();
                }
            },
        };

        let error = envelope.get("error").map(rt_error);
        match cid {
            Some(raw) => {
                let tag = RequestTag::from_raw(raw);
                if self.heartbeat_tag == Some(tag) {
                    self.heartbeat.acknowledge();
                    self.heartbeat_tag = None;
                }
                let outcome = match error {
                    Some(error) => Err(error),
                    None => Ok(envelope),
                };
                self.defer(tag, outcome);
                PumpReport::default()
            }
            None => {
                // Responses that arrived before this push resolve first.
                let report = self.pump();
                match error {
                    Some(error) => self.listener.on_error(&error),
                    None => self.listener.on_push(&envelope),
                }
                report
            }
        }
    }

    fn drive_heartbeat(&mut self) {
        let now = self.clock.now_ms();
        let pending = !self.requests.is_empty();
        match self.heartbeat.poll(now, self.transport.is_connected(), pending) {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendPing => {
                let tag = self.ping(None);
                if self.transport.is_connected() {
                    self.heartbeat.ping_sent(now);
                    self.heartbeat_tag = Some(tag);
                }
            }
            HeartbeatAction::Fail if !self.connected => {
                tracing::debug!("heartbeat failure after disconnect ignored");
            }
            HeartbeatAction::Fail => {
                tracing::warn!(interval_ms = ?self.heartbeat.interval(), "heartbeat ping unanswered");
                self.transport.disconnect();
                let info = DisconnectInfo::new(
                    DisconnectCode::HeartbeatFailure,
                    "heartbeat ping unanswered",
                    false,
                );
                self.teardown(info);
            }
        }
    }

    /// Local drop outside of tick: the transport goes silent, so report it
    /// ourselves on the next tick.
    fn drop_connection(&mut self, info: DisconnectInfo) {
        self.transport.disconnect();
        self.heartbeat.stop();
        if self.connected {
            self.connected = false;
            self.pending_disconnect = Some(info);
        }
    }

    fn teardown(&mut self, info: DisconnectInfo) -> PumpReport {
        let report = self.pump();
        self.connected = false;
        self.heartbeat_tag = None;
        self.heartbeat.stop();
        self.requests.cancel_all("connection closed");
        self.deliver_unclaimed();
        self.listener.on_disconnect(&info);
        report
    }
}

impl Drop for RtClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn rt_error(error: &Value) -> ClientError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    ClientError::new(ErrorKind::from_rt_code(code), message)
}
