//! Per-connection protocol worker.
//!
//! One worker owns the read half of a connection and drives the frame
//! state machine: handshake, then pipelined NOTIFY frames, then
//! teardown. Each NOTIFY is processed in its own task so a slow handler
//! never blocks frames behind it; all writes funnel through the
//! connection's writer task.
//!
//! Lifecycle: INIT (only HAPROXY-HELLO legal) → READY (notify and
//! disconnect legal) → CLOSED. Anything out of sequence is fatal to the
//! connection; other connections are unaffected.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::agent::AgentConfig;
use crate::error::{Result, SpopError};
use crate::handler::Handler;
use crate::protocol::{flags, Frame, FrameCodec, FramePayload, Message, SPOP_VERSION};
use crate::request::Request;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Capabilities announced in AGENT-HELLO.
pub const CAPABILITIES: &str = "pipelining,async";

/// Reason sent with the agent's disconnect frame.
const DISCONNECT_MESSAGE: &str = "connection closed by server";

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Whether the read loop keeps going after a frame.
enum Flow {
    Continue,
    Shutdown,
}

/// Serve one connection to completion.
///
/// Runs the full lifecycle and consumes the connection; never returns an
/// error to the caller — terminal failures are logged with the
/// connection's total elapsed time. Public so the agent can be embedded
/// on transports other than TCP.
pub async fn handle<C, H>(conn: C, handler: Arc<H>, config: AgentConfig)
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    H: Handler,
{
    let started = Instant::now();
    let (reader, write_half) = tokio::io::split(conn);
    let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());

    let mut worker = Worker {
        handler,
        writer,
        max_frame_size: config.max_frame_size,
        handler_timeout: config.handler_timeout,
        ready: false,
        engine_id: String::new(),
    };

    let result = worker.run(reader, config.max_frame_size).await;

    // Dropping the worker releases its writer handle; the writer task
    // exits once in-flight notify tasks drop theirs, so pending acks
    // still drain on a clean close.
    drop(worker);
    if let Ok(Err(err)) = writer_task.await {
        tracing::debug!(error = %err, "writer task ended with error");
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(()) => tracing::debug!(elapsed_ms, "connection closed"),
        Err(err) => tracing::error!(error = %err, elapsed_ms, "connection failed"),
    }
}

struct Worker<H> {
    handler: Arc<H>,
    writer: WriterHandle,
    /// Configured bound until handshake, negotiated afterwards.
    max_frame_size: u32,
    handler_timeout: Option<std::time::Duration>,
    ready: bool,
    engine_id: String,
}

impl<H: Handler> Worker<H> {
    async fn run<R>(&mut self, mut reader: R, codec_max: u32) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut codec = FrameCodec::new(codec_max);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                // Clean EOF from the peer.
                return Ok(());
            }

            for frame in codec.push(&buf[..n])? {
                if let Flow::Shutdown = self.dispatch(frame).await? {
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Flow> {
        let stream_id = frame.stream_id;
        let frame_id = frame.frame_id;
        let frame_flags = frame.flags;
        let frame_type = frame.frame_type();

        match frame.payload {
            FramePayload::HaproxyHello {
                supported_versions,
                max_frame_size,
                healthcheck,
                engine_id,
                ..
            } => {
                if self.ready {
                    return Err(SpopError::Protocol(
                        "duplicate HAPROXY-HELLO on established connection".to_string(),
                    ));
                }
                self.handshake(
                    stream_id,
                    frame_id,
                    &supported_versions,
                    max_frame_size,
                    healthcheck,
                    engine_id,
                )
                .await
            }

            FramePayload::Notify { messages } => {
                if !self.ready {
                    return Err(SpopError::Protocol(
                        "NOTIFY before handshake".to_string(),
                    ));
                }
                if frame_flags & flags::FIN == 0 {
                    return Err(SpopError::Protocol(
                        "fragmented NOTIFY not supported".to_string(),
                    ));
                }
                self.spawn_notify(stream_id, frame_id, messages);
                Ok(Flow::Continue)
            }

            FramePayload::HaproxyDisconnect {
                status_code,
                message,
            } => {
                if !self.ready {
                    return Err(SpopError::Protocol(
                        "HAPROXY-DISCONNECT before handshake".to_string(),
                    ));
                }
                tracing::info!(status_code, message = %message, "peer disconnecting");

                let frame = Frame::agent_disconnect(stream_id, frame_id, 0, DISCONNECT_MESSAGE);
                let bytes = frame.encode(self.max_frame_size)?;
                self.writer
                    .send_and_wait(OutboundFrame::new(bytes, stream_id, frame_id))
                    .await?;
                Ok(Flow::Shutdown)
            }

            // Agent-role frames reflected back, or types from a newer
            // protocol revision: tolerated and skipped.
            _ => {
                tracing::warn!(
                    frame_type = ?frame_type,
                    stream_id,
                    frame_id,
                    "ignoring unexpected frame"
                );
                Ok(Flow::Continue)
            }
        }
    }

    async fn handshake(
        &mut self,
        stream_id: u64,
        frame_id: u64,
        supported_versions: &str,
        peer_max_frame_size: u32,
        healthcheck: bool,
        engine_id: String,
    ) -> Result<Flow> {
        if !supports_version(supported_versions, SPOP_VERSION) {
            return Err(SpopError::Protocol(format!(
                "no common protocol version (peer supports \"{}\")",
                supported_versions
            )));
        }

        let negotiated = self.max_frame_size.min(peer_max_frame_size);

        let hello = Frame::agent_hello(stream_id, frame_id, SPOP_VERSION, negotiated, CAPABILITIES);
        let bytes = hello.encode(self.max_frame_size)?;
        self.writer
            .send_and_wait(OutboundFrame::new(bytes, stream_id, frame_id))
            .await?;

        if healthcheck {
            // A healthcheck connection ends right after the hello
            // exchange; the peer is not going to send notifies.
            tracing::debug!("healthcheck handshake complete");
            return Ok(Flow::Shutdown);
        }

        self.max_frame_size = negotiated;
        self.engine_id = engine_id;
        self.ready = true;
        tracing::debug!(
            engine_id = %self.engine_id,
            max_frame_size = negotiated,
            "handshake complete"
        );
        Ok(Flow::Continue)
    }

    fn spawn_notify(&self, stream_id: u64, frame_id: u64, messages: Vec<Message>) {
        let handler = self.handler.clone();
        let writer = self.writer.clone();
        let engine_id = self.engine_id.clone();
        let max_frame_size = self.max_frame_size;
        let timeout = self.handler_timeout;

        tokio::spawn(async move {
            let started = Instant::now();

            let mut req = Request::acquire();
            req.stream_id = stream_id;
            req.frame_id = frame_id;
            req.engine_id.push_str(&engine_id);
            req.messages = messages;

            match timeout {
                Some(deadline) => {
                    if tokio::time::timeout(deadline, handler.handle(&mut req))
                        .await
                        .is_err()
                    {
                        tracing::warn!(
                            stream_id,
                            frame_id,
                            "handler deadline exceeded, acking with recorded actions"
                        );
                    }
                }
                None => handler.handle(&mut req).await,
            }

            let ack = Frame::agent_ack(stream_id, frame_id, std::mem::take(&mut req.actions));
            let encoded = ack.encode(max_frame_size);

            // Hand the actions buffer back so its capacity survives the
            // trip through the pool, then release the request before the
            // ack is even queued.
            if let FramePayload::AgentAck { actions } = ack.payload {
                req.actions = actions;
            }
            drop(req);

            let bytes = match encoded {
                Ok(bytes) => bytes,
                Err(err) => {
                    // Nothing partial was written; this stream's ack is
                    // lost but the connection stays healthy.
                    tracing::error!(
                        stream_id,
                        frame_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "dropping unencodable ack"
                    );
                    return;
                }
            };

            let mut out = OutboundFrame::new(bytes, stream_id, frame_id);
            out.started = started;
            if let Err(err) = writer.send(out).await {
                tracing::error!(
                    stream_id,
                    frame_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "ack frame write failed"
                );
            }
        });
    }
}

/// Check a comma-separated supported-versions list for a version.
fn supports_version(supported: &str, wanted: &str) -> bool {
    supported.split(',').any(|v| v.trim() == wanted)
}
