//! Agent entry point: configuration and the accept loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::error::Result;
use crate::handler::Handler;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::worker;
use crate::writer::WriterConfig;

/// Configuration shared by every connection the agent serves.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound offered during handshake; the effective frame size is
    /// the smaller of this and what the peer announces.
    pub max_frame_size: u32,
    /// Writer task tuning.
    pub writer: WriterConfig,
    /// Per-notify handler deadline. When it fires, the ack is sent with
    /// whatever actions the handler managed to record. `None` (the
    /// default) lets handlers run unbounded.
    pub handler_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer: WriterConfig::default(),
            handler_timeout: None,
        }
    }
}

impl AgentConfig {
    /// Set the offered maximum frame size.
    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the per-notify handler deadline.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Replace the writer task tuning.
    pub fn with_writer_config(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }
}

/// A stream processing offload agent.
///
/// Owns the handler and the configuration; `serve` accepts connections
/// and runs one [`worker`] per connection until the listener fails.
pub struct Agent<H> {
    handler: Arc<H>,
    config: AgentConfig,
}

impl<H: Handler> Agent<H> {
    /// Create an agent with default configuration.
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, AgentConfig::default())
    }

    /// Create an agent with explicit configuration.
    pub fn with_config(handler: H, config: AgentConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
        }
    }

    /// Accept connections forever, spawning a worker per connection.
    ///
    /// Individual accept failures are logged and do not stop the loop;
    /// the error return is for listener-level failures surfaced by
    /// repeated accepts (kept in the signature so callers can `?`).
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::warn!(%peer, error = %err, "set_nodelay failed");
                    }
                    let handler = self.handler.clone();
                    let config = self.config.clone();
                    tokio::spawn(worker::handle(stream, handler, config));
                }
                Err(err) => {
                    tracing::error!(error = %err, "accept failed");
                }
            }
        }
    }
}
