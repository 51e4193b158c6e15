//! Unary request transport.
//!
//! [`ThreadedHttpTransport`] runs blocking `ureq` calls on a small pool of
//! named worker threads fed by a crossbeam channel. Finished responses are
//! posted to a [`HandoffQueue`] and reach the client only when it polls the
//! transport from its tick.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;

use crate::completion::{Completion, CompletionSender, CompletionSource, HandoffQueue, LiveQueues, Poll};
use crate::error::ClientError;
use crate::registry::RequestTag;

/// HTTP verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Upper-case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unary request, relative to the transport's base URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Path starting with `/`, e.g. `/v2/account`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    /// Request with no query, headers or body.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Add a query argument.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Status and body of a completed exchange, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Backend for unary requests. Completions are drained through
/// [`CompletionSource`].
pub trait HttpTransport: CompletionSource<HttpResponse> + Send {
    /// Set the `scheme://host:port` prefix for request paths.
    fn set_base_uri(&mut self, uri: &str);

    /// Current base URI.
    fn base_uri(&self) -> &str;

    /// Start a request. Its outcome is posted under `tag`.
    fn submit(&mut self, tag: RequestTag, request: HttpRequest);

    /// Abandon every request submitted so far. No completion for them will
    /// be polled afterwards.
    fn cancel_all(&mut self);

    /// Requests submitted and not yet finished by a worker.
    fn in_flight(&self) -> u64;
}

/// Settings for [`ThreadedHttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub worker_threads: usize,
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&kestrel_config::HttpConfig> for HttpTransportConfig {
    fn from(config: &kestrel_config::HttpConfig) -> Self {
        Self {
            worker_threads: config.worker_threads,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }
}

struct HttpJob {
    tag: RequestTag,
    url: String,
    request: HttpRequest,
    cancelled: Arc<AtomicBool>,
    sender: CompletionSender<HttpResponse>,
}

/// [`HttpTransport`] backed by a worker thread pool.
pub struct ThreadedHttpTransport {
    base_uri: String,
    jobs: Option<Sender<HttpJob>>,
    // Clone of the workers' end, used to discard jobs nobody picked up yet.
    backlog: Receiver<HttpJob>,
    queue: HandoffQueue<HttpResponse>,
    active: Arc<DashMap<RequestTag, Arc<AtomicBool>>>,
    in_flight: Arc<AtomicU64>,
}

impl ThreadedHttpTransport {
    /// Spawn the worker pool. The completion queue is registered in `live`.
    pub fn new(config: HttpTransportConfig, live: LiveQueues<HttpResponse>) -> std::io::Result<Self> {
        let (job_sender, job_receiver) = crossbeam_channel::unbounded::<HttpJob>();
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .build();
        let active: Arc<DashMap<RequestTag, Arc<AtomicBool>>> = Arc::new(DashMap::new());
        let in_flight = Arc::new(AtomicU64::new(0));

        for index in 0..config.worker_threads.max(1) {
            let receiver = job_receiver.clone();
            let agent = agent.clone();
            let active = Arc::clone(&active);
            let in_flight = Arc::clone(&in_flight);

            std::thread::Builder::new()
                .name(format!("kestrel-http-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if !job.cancelled.load(Ordering::Relaxed) {
                            let outcome = perform(&agent, &job.url, &job.request);
                            if !job.cancelled.load(Ordering::Relaxed) {
                                job.sender.post(Completion::Request {
                                    tag: job.tag,
                                    outcome,
                                });
                            }
                        }
                        active.remove_if(&job.tag, |_, flag| Arc::ptr_eq(flag, &job.cancelled));
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    }
                })?;
        }

        Ok(Self {
            base_uri: String::new(),
            jobs: Some(job_sender),
            backlog: job_receiver,
            queue: HandoffQueue::with_registry(live),
            active,
            in_flight,
        })
    }

    /// Whether `tag` was submitted and is still being worked on.
    pub fn is_active(&self, tag: RequestTag) -> bool {
        self.active.contains_key(&tag)
    }
}

fn perform(agent: &ureq::Agent, url: &str, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
    let mut call = agent.request(request.method.as_str(), url);
    for (key, value) in &request.query {
        call = call.query(key, value);
    }
    for (name, value) in &request.headers {
        call = call.set(name, value);
    }

    let result = if request.body.is_empty() && request.method == HttpMethod::Get {
        call.call()
    } else {
        call.send_string(&request.body)
    };

    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(error)) => {
            tracing::debug!(%url, %error, "request failed before a response arrived");
            return Err(ClientError::connection(error.to_string()));
        }
    };

    let status = response.status();
    let body = response
        .into_string()
        .map_err(|e| ClientError::transport(format!("failed to read response body: {e}")))?;
    Ok(HttpResponse { status, body })
}

impl CompletionSource<HttpResponse> for ThreadedHttpTransport {
    fn poll_completion(&mut self) -> Poll<HttpResponse> {
        self.queue.poll_completion()
    }
}

impl HttpTransport for ThreadedHttpTransport {
    fn set_base_uri(&mut self, uri: &str) {
        self.base_uri = uri.trim_end_matches('/').to_string();
    }

    fn base_uri(&self) -> &str {
        &self.base_uri
    }

    fn submit(&mut self, tag: RequestTag, request: HttpRequest) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = HttpJob {
            tag,
            url: format!("{}{}", self.base_uri, request.path),
            request,
            cancelled: Arc::clone(&cancelled),
            sender: self.queue.sender(),
        };
        tracing::debug!(%tag, method = %job.request.method, url = %job.url, "submitting request");

        self.active.insert(tag, cancelled);
        self.in_flight.fetch_add(1, Ordering::Relaxed);

        let sent = match &self.jobs {
            Some(jobs) => jobs.send(job).map_err(|e| e.into_inner()),
            None => Err(job),
        };
        if let Err(job) = sent {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            self.active.remove(&tag);
            job.sender.post(Completion::Request {
                tag,
                outcome: Err(ClientError::internal("request workers are not running")),
            });
        }
    }

    fn cancel_all(&mut self) {
        for entry in self.active.iter() {
            entry.value().store(true, Ordering::Relaxed);
        }
        self.active.clear();

        let mut dropped = 0;
        while let Ok(_job) = self.backlog.try_recv() {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "discarded queued requests");
        }
        self.queue.invalidate();
    }

    fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Drop for ThreadedHttpTransport {
    fn drop(&mut self) {
        self.cancel_all();
        // Workers exit once the channel closes; in-flight calls finish on
        // their own and their results are discarded.
        self.jobs.take();
    }
}
