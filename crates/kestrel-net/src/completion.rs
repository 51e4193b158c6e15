//! Typed completion events and the worker-to-tick hand-off queue.
//!
//! Backends that finish work on other threads post a [`Completion`] through
//! a [`CompletionSender`]. Nothing reaches a continuation until the owning
//! client polls the [`HandoffQueue`] from its tick thread.
//!
//! Senders never hold the queue itself. They hold a [`QueueId`] and look it
//! up in a [`LiveQueues`] registry on every post; once the queue is dropped
//! the lookup fails and the result is discarded. Each sender is also stamped
//! with the queue's epoch at the time the request was issued, and
//! [`HandoffQueue::invalidate`] moves the epoch on, so completions for
//! requests that were already cancelled are dropped on arrival.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use dashmap::DashMap;

use crate::error::ClientError;
use crate::registry::RequestTag;
use crate::transport::DisconnectInfo;

/// One finished unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    /// A request finished; resolve its context.
    Request {
        /// Correlation tag issued by the registry.
        tag: RequestTag,
        /// What the backend produced.
        outcome: Result<T, ClientError>,
    },
    /// An unsolicited inbound message.
    Message(Vec<u8>),
    /// The underlying connection closed.
    Closed(DisconnectInfo),
}

/// Result of polling a completion source with zero timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// A completion is ready.
    Ready(Completion<T>),
    /// Nothing is ready right now; more may come later.
    Empty,
    /// The source has shut down and will produce nothing more.
    Shutdown,
    /// The source broke.
    Failed(String),
}

/// Anything the completion pump can drain.
pub trait CompletionSource<T> {
    /// Fetch the next ready completion without blocking.
    fn poll_completion(&mut self) -> Poll<T>;
}

/// A local buffer of completions produced on the tick thread itself.
impl<T> CompletionSource<T> for VecDeque<Completion<T>> {
    fn poll_completion(&mut self) -> Poll<T> {
        match self.pop_front() {
            Some(completion) => Poll::Ready(completion),
            None => Poll::Empty,
        }
    }
}

/// Identity of a live hand-off queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

struct Stamped<T> {
    epoch: u64,
    completion: Completion<T>,
}

struct QueueShared<T> {
    tx: Sender<Stamped<T>>,
}

/// Registry of live hand-off queues, shared with worker threads.
pub struct LiveQueues<T> {
    queues: Arc<DashMap<QueueId, Weak<QueueShared<T>>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for LiveQueues<T> {
    fn clone(&self) -> Self {
        Self {
            queues: Arc::clone(&self.queues),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for LiveQueues<T> {
    fn default() -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<T> LiveQueues<T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, shared: &Arc<QueueShared<T>>) -> QueueId {
        let id = QueueId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.queues.insert(id, Arc::downgrade(shared));
        id
    }

    fn lookup(&self, id: QueueId) -> Option<Arc<QueueShared<T>>> {
        self.queues.get(&id).and_then(|entry| entry.upgrade())
    }

    fn unregister(&self, id: QueueId) {
        self.queues.remove(&id);
    }

    /// Whether the queue with `id` still exists.
    pub fn is_live(&self, id: QueueId) -> bool {
        self.lookup(id).is_some()
    }

    /// Number of queues currently registered.
    pub fn live_count(&self) -> usize {
        self.queues.len()
    }
}

/// Posts completions to a hand-off queue from any thread.
pub struct CompletionSender<T> {
    live: LiveQueues<T>,
    id: QueueId,
    epoch: u64,
}

impl<T> Clone for CompletionSender<T> {
    fn clone(&self) -> Self {
        Self {
            live: self.live.clone(),
            id: self.id,
            epoch: self.epoch,
        }
    }
}

impl<T> CompletionSender<T> {
    /// Post a completion. Returns `false` if the queue no longer exists.
    pub fn post(&self, completion: Completion<T>) -> bool {
        let Some(shared) = self.live.lookup(self.id) else {
            tracing::trace!(queue = %self.id, "completion for a dropped queue discarded");
            return false;
        };
        shared
            .tx
            .send(Stamped {
                epoch: self.epoch,
                completion,
            })
            .is_ok()
    }
}

/// Multi-producer queue drained on the tick thread.
pub struct HandoffQueue<T> {
    id: QueueId,
    rx: Receiver<Stamped<T>>,
    // Keeps the registry entry upgradable for as long as the queue lives.
    _shared: Arc<QueueShared<T>>,
    live: LiveQueues<T>,
    epoch: u64,
    shut_down: bool,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffQueue<T> {
    /// Queue with its own private registry.
    pub fn new() -> Self {
        Self::with_registry(LiveQueues::new())
    }

    /// Queue registered in a shared registry.
    pub fn with_registry(live: LiveQueues<T>) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(QueueShared { tx });
        let id = live.register(&shared);
        Self {
            id,
            rx,
            _shared: shared,
            live,
            epoch: 0,
            shut_down: false,
        }
    }

    /// This queue's identity in its registry.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// A sender stamped with the current epoch.
    pub fn sender(&self) -> CompletionSender<T> {
        CompletionSender {
            live: self.live.clone(),
            id: self.id,
            epoch: self.epoch,
        }
    }

    /// Discard everything posted by senders created before this call,
    /// whether already queued or still to come.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        let stale = self.rx.try_iter().count();
        if stale > 0 {
            tracing::debug!(queue = %self.id, stale, "dropped queued completions");
        }
    }

    /// Stop producing completions; subsequent polls report shutdown.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
    }

    /// Completions waiting to be polled, stale ones included.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

impl<T> CompletionSource<T> for HandoffQueue<T> {
    fn poll_completion(&mut self) -> Poll<T> {
        if self.shut_down {
            return Poll::Shutdown;
        }
        let current = self.epoch;
        loop {
            match self.rx.try_recv() {
                Ok(stamped) if stamped.epoch != current => {
                    tracing::debug!(queue = %self.id, "dropped completion from a cancelled batch");
                }
                Ok(stamped) => return Poll::Ready(stamped.completion),
                Err(TryRecvError::Empty) => return Poll::Empty,
                Err(TryRecvError::Disconnected) => {
                    return Poll::Failed("hand-off channel disconnected".to_string());
                }
            }
        }
    }
}

impl<T> Drop for HandoffQueue<T> {
    fn drop(&mut self) {
        self.live.unregister(self.id);
    }
}
