//! The completion pump run from every client `tick`.
//!
//! Drains a [`CompletionSource`] with zero timeout, resolving request
//! completions through the [`PendingRequests`] registry and handing the
//! other completion kinds to the caller. It stops as soon as the source has
//! nothing ready, so it can be called at any cadence without losing or
//! repeating work.

use crate::completion::{Completion, CompletionSource, Poll};
use crate::error::ClientError;
use crate::registry::{PendingRequests, Resolution};

/// What one drain pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpReport {
    /// Requests whose context was found and resolved.
    pub resolved: usize,
    /// Completions whose tag matched no context.
    pub unknown: usize,
    /// Message and close completions passed to the caller.
    pub forwarded: usize,
    /// The source reported shutdown.
    pub shutdown: bool,
    /// The source failed; the failure went to the error handler.
    pub failed: bool,
}

impl PumpReport {
    /// Whether anything at all was processed.
    pub fn is_idle(&self) -> bool {
        self.resolved == 0 && self.unknown == 0 && self.forwarded == 0
    }
}

impl std::ops::AddAssign for PumpReport {
    fn add_assign(&mut self, other: Self) {
        self.resolved += other.resolved;
        self.unknown += other.unknown;
        self.forwarded += other.forwarded;
        self.shutdown |= other.shutdown;
        self.failed |= other.failed;
    }
}

/// Drain everything `source` has ready right now.
pub fn drain<T, S>(
    source: &mut S,
    requests: &mut PendingRequests<T>,
    mut forward: impl FnMut(Completion<T>),
) -> PumpReport
where
    S: CompletionSource<T> + ?Sized,
{
    let mut report = PumpReport::default();
    loop {
        match source.poll_completion() {
            Poll::Ready(Completion::Request { tag, outcome }) => {
                match requests.resolve(tag, outcome) {
                    Resolution::UnknownTag => report.unknown += 1,
                    Resolution::Delivered | Resolution::Unclaimed => report.resolved += 1,
                }
            }
            Poll::Ready(other) => {
                report.forwarded += 1;
                forward(other);
            }
            Poll::Empty => break,
            Poll::Shutdown => {
                tracing::debug!("completion source shut down");
                report.shutdown = true;
                break;
            }
            Poll::Failed(reason) => {
                tracing::error!(%reason, "completion source failed");
                requests.report_error(&ClientError::internal(reason));
                report.failed = true;
                break;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::{Continuation, RequestTag};
    use crate::transport::{DisconnectCode, DisconnectInfo};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays a fixed script of poll results.
    struct Script(VecDeque<Poll<u32>>);

    impl CompletionSource<u32> for Script {
        fn poll_completion(&mut self) -> Poll<u32> {
            self.0.pop_front().unwrap_or(Poll::Empty)
        }
    }

    type Log = Arc<Mutex<Vec<(&'static str, Result<u32, ClientError>)>>>;

    fn recorder(log: &Log, name: &'static str) -> Option<Continuation<u32>> {
        let log = Arc::clone(log);
        Some(Box::new(move |outcome| log.lock().unwrap().push((name, outcome))))
    }

    fn done(tag: RequestTag, value: u32) -> Poll<u32> {
        Poll::Ready(Completion::Request {
            tag,
            outcome: Ok(value),
        })
    }

    #[test]
    fn test_reverse_order_completions_resolve_their_own_requests() {
        let log = Log::default();
        let mut requests = PendingRequests::default();
        let a = requests.create(recorder(&log, "a"));
        let b = requests.create(recorder(&log, "b"));

        let mut source = Script(VecDeque::from([done(b, 200), done(a, 100)]));
        let report = drain(&mut source, &mut requests, |_| {});

        assert_eq!(report.resolved, 2);
        assert_eq!(*log.lock().unwrap(), vec![("b", Ok(200)), ("a", Ok(100))]);
        assert!(requests.is_empty());
    }

    #[test]
    fn test_stops_at_empty_and_resumes_later() {
        let log = Log::default();
        let mut requests = PendingRequests::default();
        let a = requests.create(recorder(&log, "a"));
        let b = requests.create(recorder(&log, "b"));

        let mut source = Script(VecDeque::from([done(a, 1), Poll::Empty, done(b, 2)]));
        assert_eq!(drain(&mut source, &mut requests, |_| {}).resolved, 1);
        assert_eq!(requests.len(), 1);
        assert_eq!(drain(&mut source, &mut requests, |_| {}).resolved, 1);
        assert!(drain(&mut source, &mut requests, |_| {}).is_idle());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_completion_is_not_delivered_twice() {
        let log = Log::default();
        let mut requests = PendingRequests::default();
        let a = requests.create(recorder(&log, "a"));

        let mut source = Script(VecDeque::from([done(a, 1), done(a, 2)]));
        let report = drain(&mut source, &mut requests, |_| {});

        assert_eq!(report.resolved, 1);
        assert_eq!(report.unknown, 1);
        assert_eq!(*log.lock().unwrap(), vec![("a", Ok(1))]);
    }

    #[test]
    fn test_shutdown_ends_the_loop() {
        let mut requests: PendingRequests<u32> = PendingRequests::default();
        let tag = requests.create(None);
        let mut source = Script(VecDeque::from([Poll::Shutdown, done(tag, 1)]));
        let report = drain(&mut source, &mut requests, |_| {});
        assert!(report.shutdown);
        assert!(requests.contains(tag));
    }

    #[test]
    fn test_failure_is_reported_not_fatal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut requests: PendingRequests<u32> = PendingRequests::default();
        let sink = Arc::clone(&seen);
        requests.set_default_error_handler(Box::new(move |e| sink.lock().unwrap().push(e.clone())));

        let mut source = Script(VecDeque::from([Poll::Failed("queue broke".to_string())]));
        let report = drain(&mut source, &mut requests, |_| {});

        assert!(report.failed);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].kind, ErrorKind::InternalError);
        assert_eq!(seen[0].message, "queue broke");
    }

    #[test]
    fn test_non_request_completions_forwarded_in_order() {
        let mut requests: PendingRequests<u32> = PendingRequests::default();
        let closed = DisconnectInfo::new(DisconnectCode::NormalClosure, "bye", true);
        let mut source = Script(VecDeque::from([
            Poll::Ready(Completion::Message(b"one".to_vec())),
            Poll::Ready(Completion::Closed(closed.clone())),
        ]));

        let mut forwarded = Vec::new();
        let report = drain(&mut source, &mut requests, |c| forwarded.push(c));

        assert_eq!(report.forwarded, 2);
        assert_eq!(
            forwarded,
            vec![Completion::Message(b"one".to_vec()), Completion::Closed(closed)]
        );
    }
}
