//! Connection liveness: inbound activity timeout, application heartbeat,
//! and the one-shot handle returned from a connect call.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::ClientError;

/// Tracks the last time anything arrived on a connection.
#[derive(Debug, Clone, Default)]
pub struct ActivityMonitor {
    timeout_ms: u32,
    last_activity_ms: u64,
}

impl ActivityMonitor {
    /// Monitor with the given timeout; 0 disables expiry.
    pub fn new(timeout_ms: u32) -> Self {
        Self {
            timeout_ms,
            last_activity_ms: 0,
        }
    }

    /// Change the timeout. Takes effect on the next check.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    /// Current timeout in milliseconds.
    pub fn timeout(&self) -> u32 {
        self.timeout_ms
    }

    /// Record inbound bytes at `now_ms`.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    /// Milliseconds since the last recorded activity.
    pub fn idle_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    /// Whether the connection has been silent for at least the timeout.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.timeout_ms > 0 && self.idle_for(now_ms) >= u64::from(self.timeout_ms)
    }
}

/// What the heartbeat wants done this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing to do.
    Idle,
    /// Send an application ping now.
    SendPing,
    /// The outstanding ping went unanswered; drop the connection.
    Fail,
}

/// Application-level ping scheduler.
///
/// A ping goes out once nothing has been sent for one interval and no
/// requests are outstanding. If its reply does not arrive within another
/// interval the heartbeat fails, and reports that only once per connection.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval_ms: Option<u64>,
    last_sent_ms: u64,
    ping_sent_ms: Option<u64>,
    failure_reported: bool,
}

impl Heartbeat {
    /// Heartbeat with the given interval; `None` disables it.
    pub fn new(interval_ms: Option<u64>) -> Self {
        Self {
            interval_ms,
            last_sent_ms: 0,
            ping_sent_ms: None,
            failure_reported: false,
        }
    }

    /// Configured interval.
    pub fn interval(&self) -> Option<u64> {
        self.interval_ms
    }

    /// Start fresh for a new connection.
    pub fn reset(&mut self, now_ms: u64) {
        self.last_sent_ms = now_ms;
        self.ping_sent_ms = None;
        self.failure_reported = false;
    }

    /// Forget any outstanding ping; the connection it was sent on is gone.
    pub fn stop(&mut self) {
        self.ping_sent_ms = None;
    }

    /// Record an outbound message.
    pub fn message_sent(&mut self, now_ms: u64) {
        self.last_sent_ms = now_ms;
    }

    /// Record that a ping went out.
    pub fn ping_sent(&mut self, now_ms: u64) {
        self.ping_sent_ms = Some(now_ms);
        self.last_sent_ms = now_ms;
    }

    /// The server answered the ping, successfully or not.
    pub fn acknowledge(&mut self) {
        self.ping_sent_ms = None;
    }

    /// Whether a ping is awaiting its reply.
    pub fn awaiting_reply(&self) -> bool {
        self.ping_sent_ms.is_some()
    }

    /// Decide what to do at `now_ms`.
    pub fn poll(&mut self, now_ms: u64, connected: bool, requests_pending: bool) -> HeartbeatAction {
        let Some(interval) = self.interval_ms else {
            return HeartbeatAction::Idle;
        };

        if let Some(sent) = self.ping_sent_ms
            && sent.saturating_add(interval) < now_ms
        {
            self.ping_sent_ms = None;
            if self.failure_reported {
                return HeartbeatAction::Idle;
            }
            self.failure_reported = true;
            return HeartbeatAction::Fail;
        }

        // Pings may stall behind bulk transfers; outstanding requests are
        // the only hint we have that one is running.
        if !connected || requests_pending || self.ping_sent_ms.is_some() {
            return HeartbeatAction::Idle;
        }
        if self.last_sent_ms.saturating_add(interval) > now_ms {
            return HeartbeatAction::Idle;
        }
        HeartbeatAction::SendPing
    }
}

/// Caller-side handle for the outcome of one connect call.
#[derive(Debug)]
pub struct ConnectWaiter {
    rx: Receiver<Result<(), ClientError>>,
    settled: Option<Result<(), ClientError>>,
}

/// Client-side half that settles a [`ConnectWaiter`].
#[derive(Debug)]
pub(crate) struct ConnectNotifier {
    tx: Sender<Result<(), ClientError>>,
}

/// A linked notifier and waiter.
pub(crate) fn connect_waiter() -> (ConnectNotifier, ConnectWaiter) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (ConnectNotifier { tx }, ConnectWaiter { rx, settled: None })
}

impl ConnectNotifier {
    /// Settle the waiter. A dropped waiter is fine.
    pub(crate) fn settle(self, outcome: Result<(), ClientError>) {
        let _ = self.tx.send(outcome);
    }
}

impl ConnectWaiter {
    /// The outcome, if known yet.
    pub fn try_result(&mut self) -> Option<Result<(), ClientError>> {
        if self.settled.is_none() {
            self.settled = match self.rx.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(Err(ClientError::cancelled(
                    "client dropped before the connection settled",
                ))),
            };
        }
        self.settled.clone()
    }

    /// Block up to `timeout` for the outcome. Only useful when another
    /// thread is ticking the client.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<(), ClientError>> {
        if self.settled.is_none() {
            self.settled = match self.rx.recv_timeout(timeout) {
                Ok(outcome) => Some(outcome),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(Err(ClientError::cancelled(
                    "client dropped before the connection settled",
                ))),
            };
        }
        self.settled.clone()
    }
}
