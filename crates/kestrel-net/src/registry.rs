//! Pending-request registry: correlates outstanding requests with the
//! continuation that receives their outcome.
//!
//! Contexts are stored by value in a map keyed by [`RequestTag`]. Resolving
//! a tag removes its context before the continuation runs, so a second
//! resolution of the same tag finds nothing and cannot invoke it again.
//!
//! The registry is not thread-safe on purpose: it is owned by a client and
//! only touched from the thread that ticks that client.

use std::collections::HashMap;
use std::fmt;

use crate::error::ClientError;

/// Opaque correlation handle for one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestTag(u64);

impl RequestTag {
    /// Raw value, as written into wire envelopes.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Rebuild a tag from a wire value.
    pub fn from_raw(raw: u64) -> Self {
        RequestTag(raw)
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives the single outcome of a request.
pub type Continuation<T> = Box<dyn FnOnce(Result<T, ClientError>) + Send>;

/// Receives errors nobody else claimed.
pub type ErrorHandler = Box<dyn FnMut(&ClientError) + Send>;

/// How tags are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagPolicy {
    /// Strictly increasing from 1.
    #[default]
    Monotonic,
    /// Increasing, but restart at 1 once the registry drains and the
    /// counter has passed 9. Keeps tags short on the realtime wire.
    CompactWhenIdle,
}

struct RequestContext<T> {
    continuation: Option<Continuation<T>>,
    metadata: Option<String>,
}

/// What `resolve` did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The continuation was invoked.
    Delivered,
    /// The context had no continuation; success was dropped or the error
    /// went to the default handler.
    Unclaimed,
    /// No context had this tag.
    UnknownTag,
}

/// Outstanding requests keyed by tag.
pub struct PendingRequests<T> {
    contexts: HashMap<RequestTag, RequestContext<T>>,
    last_tag: u64,
    policy: TagPolicy,
    default_error_handler: Option<ErrorHandler>,
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self::new(TagPolicy::Monotonic)
    }
}

impl<T> fmt::Debug for PendingRequests<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequests")
            .field("pending", &self.contexts.len())
            .field("last_tag", &self.last_tag)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T> PendingRequests<T> {
    /// Empty registry.
    pub fn new(policy: TagPolicy) -> Self {
        Self {
            contexts: HashMap::new(),
            last_tag: 0,
            policy,
            default_error_handler: None,
        }
    }

    /// Install the handler for errors with no continuation to go to.
    pub fn set_default_error_handler(&mut self, handler: ErrorHandler) {
        self.default_error_handler = Some(handler);
    }

    /// Allocate a context and return its tag.
    pub fn create(&mut self, continuation: Option<Continuation<T>>) -> RequestTag {
        if self.policy == TagPolicy::CompactWhenIdle && self.contexts.is_empty() && self.last_tag > 9 {
            self.last_tag = 0;
        }

        loop {
            self.last_tag = self.last_tag.wrapping_add(1).max(1);
            let tag = RequestTag(self.last_tag);
            if self.contexts.contains_key(&tag) {
                tracing::error!(%tag, "tag collision, allocating another");
                continue;
            }
            self.contexts.insert(
                tag,
                RequestContext {
                    continuation,
                    metadata: None,
                },
            );
            return tag;
        }
    }

    /// Attach per-call metadata (such as the auth header) to a context.
    pub fn set_metadata(&mut self, tag: RequestTag, metadata: impl Into<String>) -> bool {
        match self.contexts.get_mut(&tag) {
            Some(ctx) => {
                ctx.metadata = Some(metadata.into());
                true
            }
            None => false,
        }
    }

    /// Metadata attached to a pending context.
    pub fn metadata(&self, tag: RequestTag) -> Option<&str> {
        self.contexts.get(&tag).and_then(|ctx| ctx.metadata.as_deref())
    }

    /// Deliver an outcome and free the context.
    pub fn resolve(&mut self, tag: RequestTag, outcome: Result<T, ClientError>) -> Resolution {
        let Some(ctx) = self.contexts.remove(&tag) else {
            let error = ClientError::internal(format!("request context not found for tag {tag}"));
            tracing::error!(%tag, "resolution for unknown request tag");
            self.report_error(&error);
            return Resolution::UnknownTag;
        };

        match (ctx.continuation, outcome) {
            (Some(continuation), outcome) => {
                continuation(outcome);
                Resolution::Delivered
            }
            (None, Err(error)) => {
                self.report_error(&error);
                Resolution::Unclaimed
            }
            (None, Ok(_)) => Resolution::Unclaimed,
        }
    }

    /// Cancel every outstanding request.
    ///
    /// Every continuation receives a [`ErrorKind::CancelledByUser`] error,
    /// without exception, and the registry is empty afterwards. Returns the
    /// number of contexts cancelled.
    ///
    /// [`ErrorKind::CancelledByUser`]: crate::error::ErrorKind::CancelledByUser
    pub fn cancel_all(&mut self, reason: &str) -> usize {
        let drained: Vec<_> = self.contexts.drain().collect();
        let count = drained.len();
        if count > 0 {
            tracing::debug!(count, reason, "cancelling outstanding requests");
        }
        for (_, ctx) in drained {
            if let Some(continuation) = ctx.continuation {
                continuation(Err(ClientError::cancelled(reason)));
            }
        }
        count
    }

    /// Route an error to the default handler, or log it.
    pub fn report_error(&mut self, error: &ClientError) {
        match self.default_error_handler.as_mut() {
            Some(handler) => handler(error),
            None => tracing::warn!(%error, "error not handled"),
        }
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Whether `tag` is still outstanding.
    pub fn contains(&self, tag: RequestTag) -> bool {
        self.contexts.contains_key(&tag)
    }
}

impl<T> Drop for PendingRequests<T> {
    fn drop(&mut self) {
        if !self.contexts.is_empty() {
            tracing::warn!(count = self.contexts.len(), "dropping client with requests outstanding");
            self.cancel_all("client dropped");
        }
    }
}
