//! Game-server client core: request correlation, a tick-driven completion
//! pump, and a WebSocket transport state machine over non-blocking sockets.
//!
//! Nothing in this crate invokes a caller callback on its own. Clients are
//! driven by calling `tick()` from the application's thread, and every
//! continuation and listener callback runs inside that call.

pub mod client;
pub mod clock;
pub mod completion;
pub mod error;
pub mod factory;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod io;
pub mod lifecycle;
pub mod pump;
pub mod registry;
pub mod rt_client;
pub mod transport;
pub mod url;
pub mod websocket;

pub use client::{AuthMode, Client, ClientParams, interpret_response};
pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::{Completion, CompletionSender, CompletionSource, HandoffQueue, LiveQueues, Poll};
pub use error::{ClientError, ErrorKind};
pub use factory::ClientFactory;
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ThreadedHttpTransport};
pub use lifecycle::{ActivityMonitor, ConnectWaiter, Heartbeat, HeartbeatAction};
pub use pump::PumpReport;
pub use registry::{Continuation, PendingRequests, RequestTag, Resolution, TagPolicy};
pub use rt_client::{NoopListener, RtClient, RtClientListener, RtOptions};
pub use transport::{
    DisconnectCode, DisconnectInfo, RtTransport, TransportEvent, TransportHandler, TransportMode,
};
pub use websocket::{WebSocketConfig, WebSocketTransport, WsState};
