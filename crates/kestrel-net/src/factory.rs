//! Builds clients wired to the compiled-in transports.

use std::sync::Arc;

use kestrel_config::Config;

use crate::client::{Client, ClientParams};
use crate::clock::{Clock, SystemClock};
use crate::completion::LiveQueues;
use crate::frame::FrameConfig;
use crate::http::{HttpResponse, HttpTransportConfig, ThreadedHttpTransport};
use crate::io::{SchemeIo, SocketConfig};
use crate::rt_client::{RtClient, RtOptions};
use crate::websocket::{WebSocketConfig, WebSocketTransport};

/// Creates [`Client`]s and [`RtClient`]s from one configuration.
///
/// The factory owns the registry of live completion queues. Worker threads
/// of every HTTP transport it creates look their queue up there before
/// posting, so results for a dropped client are discarded instead of
/// delivered into freed state.
pub struct ClientFactory {
    config: Config,
    live: LiveQueues<HttpResponse>,
    clock: Arc<dyn Clock>,
}

impl ClientFactory {
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            live: LiveQueues::new(),
            clock: SystemClock::shared(),
        }
    }

    /// Use `clock` for the realtime transports and heartbeats.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Unary client on the threaded HTTP backend.
    pub fn create_client(&self) -> std::io::Result<Client> {
        let http = ThreadedHttpTransport::new(HttpTransportConfig::from(&self.config.http), self.live.clone())?;
        Ok(Client::new(ClientParams::from_config(&self.config.server), Box::new(http)))
    }

    /// Realtime client on the WebSocket backend.
    pub fn create_rt_client(&self) -> RtClient {
        let ws_config = WebSocketConfig {
            frame: FrameConfig {
                max_message_size: self.config.realtime.max_frame_size,
            },
            ..WebSocketConfig::default()
        };
        let transport = WebSocketTransport::new(
            SchemeIo::new(SocketConfig::default()),
            ws_config,
            Arc::clone(&self.clock),
        );
        RtClient::new(
            ClientParams::from_config(&self.config.server),
            RtOptions::from(&self.config.realtime),
            Box::new(transport),
            Arc::clone(&self.clock),
        )
    }

    /// Completion queues of HTTP transports that are still alive.
    pub fn live_transports(&self) -> usize {
        self.live.live_count()
    }
}
