//! Unary request client.
//!
//! Every request allocates a context in the client's [`PendingRequests`],
//! is handed to the [`HttpTransport`] under that context's tag, and resolves
//! during a later [`Client::tick`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use kestrel_config::ServerConfig;

use crate::completion::Completion;
use crate::error::{ClientError, ErrorKind};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::pump::{self, PumpReport};
use crate::registry::{Continuation, ErrorHandler, PendingRequests, RequestTag, TagPolicy};

/// How a request authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// `Basic` with the server key, for calls made before a session exists.
    Basic,
    /// `Bearer` with a session token.
    Bearer(String),
}

impl AuthMode {
    /// `Authorization` header value.
    pub fn header(&self, server_key: &str) -> String {
        match self {
            AuthMode::Basic => format!("Basic {}", STANDARD.encode(format!("{server_key}:"))),
            AuthMode::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

/// Where the server lives and how to introduce ourselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientParams {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub server_key: String,
}

impl Default for ClientParams {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl ClientParams {
    /// Parameters from the `server` config section.
    pub fn from_config(server: &ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.effective_port(),
            ssl: server.ssl,
            server_key: server.server_key.clone(),
        }
    }

    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `http(s)://host:port`
    pub fn http_base_uri(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.authority())
    }

    /// `ws(s)://host:port`
    pub fn ws_base_uri(&self) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        format!("{scheme}://{}", self.authority())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Turn a raw response into the body or a classified error.
pub fn interpret_response(response: HttpResponse) -> Result<String, ClientError> {
    if response.status == 200 {
        return Ok(response.body);
    }

    let trimmed = response.body.trim_start();
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<ErrorBody>(trimmed) {
            Ok(body) => Err(ClientError::new(ErrorKind::from_grpc_code(body.code), body.message)),
            Err(e) => Err(ClientError::internal(format!(
                "unparsable error body with HTTP {}: {e}",
                response.status
            ))),
        };
    }

    Err(ClientError::new(
        ErrorKind::from_http_status(response.status),
        format!("HTTP {}: {}", response.status, response.body),
    ))
}

/// Client for unary requests.
pub struct Client {
    params: ClientParams,
    http: Box<dyn HttpTransport>,
    requests: PendingRequests<HttpResponse>,
}

impl Client {
    /// Client sending through `http`.
    pub fn new(params: ClientParams, mut http: Box<dyn HttpTransport>) -> Self {
        http.set_base_uri(&params.http_base_uri());
        tracing::debug!(base_uri = http.base_uri(), "unary client created");
        Self {
            params,
            http,
            requests: PendingRequests::new(TagPolicy::Monotonic),
        }
    }

    pub fn params(&self) -> &ClientParams {
        &self.params
    }

    /// Handler for errors that have no continuation to go to.
    pub fn set_default_error_handler(&mut self, handler: ErrorHandler) {
        self.requests.set_default_error_handler(handler);
    }

    /// Issue a request. `on_done` receives the response body or an error
    /// from a later [`tick`](Self::tick), exactly once.
    pub fn request<F>(&mut self, request: HttpRequest, auth: &AuthMode, on_done: F) -> RequestTag
    where
        F: FnOnce(Result<String, ClientError>) + Send + 'static,
    {
        let continuation: Continuation<HttpResponse> =
            Box::new(move |outcome| on_done(outcome.and_then(interpret_response)));
        self.submit(request, auth, Some(continuation))
    }

    /// Like [`request`](Self::request), decoding the body as JSON.
    pub fn request_json<R, F>(&mut self, request: HttpRequest, auth: &AuthMode, on_done: F) -> RequestTag
    where
        R: DeserializeOwned,
        F: FnOnce(Result<R, ClientError>) + Send + 'static,
    {
        let continuation: Continuation<HttpResponse> = Box::new(move |outcome| {
            let decoded = outcome.and_then(interpret_response).and_then(|body| {
                serde_json::from_str(&body)
                    .map_err(|e| ClientError::internal(format!("unexpected response body: {e}")))
            });
            on_done(decoded)
        });
        self.submit(request, auth, Some(continuation))
    }

    /// Issue a request whose result only matters if it fails; errors go to
    /// the default error handler.
    pub fn request_detached(&mut self, request: HttpRequest, auth: &AuthMode) -> RequestTag {
        self.submit(request, auth, None)
    }

    fn submit(
        &mut self,
        request: HttpRequest,
        auth: &AuthMode,
        continuation: Option<Continuation<HttpResponse>>,
    ) -> RequestTag {
        let authorization = auth.header(&self.params.server_key);
        let tag = self.requests.create(continuation);
        self.requests.set_metadata(tag, authorization.clone());

        let mut request = request
            .with_header("Authorization", authorization)
            .with_header("Accept", "application/json");
        if !request.body.is_empty() {
            request = request.with_header("Content-Type", "application/json");
        }
        self.http.submit(tag, request);
        tag
    }

    /// Resolve every request whose response has arrived.
    pub fn tick(&mut self) -> PumpReport {
        pump::drain(self.http.as_mut(), &mut self.requests, |completion| {
            if let Completion::Closed(info) = completion {
                tracing::debug!(%info, "unexpected close from the unary transport");
            }
        })
    }

    /// Cancel every outstanding request. Each continuation receives
    /// [`ErrorKind::CancelledByUser`]. Returns how many were cancelled.
    pub fn disconnect(&mut self) -> usize {
        self.http.cancel_all();
        self.requests.cancel_all("client disconnected")
    }

    /// Requests issued and not yet resolved.
    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.requests.is_empty() {
            tracing::warn!(
                count = self.requests.len(),
                "unary client dropped with requests outstanding"
            );
        }
        self.disconnect();
    }
}
