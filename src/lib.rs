//! SPOP agent library for HAProxy's Stream Processing Offload Engine.
//!
//! Implements the agent side of the Stream Processing Offload Protocol
//! (SPOP) version 2.0: HAProxy opens connections to the agent, performs a
//! hello handshake, then pipelines NOTIFY frames carrying messages; the
//! agent answers each with an ACK carrying variable-setting actions.
//!
//! # Architecture
//!
//! - One worker task per connection owns the read half and the protocol
//!   state machine ([`worker`]).
//! - Every NOTIFY is processed in its own task, so acks may complete out
//!   of order while the read loop keeps draining frames.
//! - All writes on a connection funnel through a single writer task fed
//!   by a channel, with vectored-write batching and bounded backpressure
//!   ([`writer`]).
//! - Requests handed to the handler come from a process-wide pool and
//!   return to it as soon as their ack is built ([`pool`]).
//!
//! # Example
//!
//! ```no_run
//! use spop_agent::{Agent, HandlerFn, Request, Scope, TypedData};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> spop_agent::Result<()> {
//!     let handler = HandlerFn(|req: &mut Request| {
//!         let score = req
//!             .message("check-client-ip")
//!             .and_then(|msg| msg.arg("score"))
//!             .and_then(|v| v.as_u32());
//!         if let Some(score) = score {
//!             req.set_var(Scope::Transaction, "ip_score", TypedData::Uint32(score));
//!         }
//!     });
//!
//!     let listener = TcpListener::bind("127.0.0.1:9000").await?;
//!     Agent::new(handler).serve(listener).await
//! }
//! ```

pub mod agent;
pub mod error;
pub mod handler;
pub mod pool;
pub mod protocol;
pub mod request;
pub mod worker;
pub mod writer;

pub use agent::{Agent, AgentConfig};
pub use error::{Result, SpopError};
pub use handler::{BoxFuture, Handler, HandlerFn};
pub use protocol::{
    Action, Frame, FramePayload, FrameType, Message, Scope, TypedData, DEFAULT_MAX_FRAME_SIZE,
    SPOP_VERSION,
};
pub use request::Request;
pub use worker::handle;
pub use writer::WriterConfig;
