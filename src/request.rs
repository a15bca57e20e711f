//! Request value object handed to the handler.
//!
//! One request per NOTIFY frame: the notify's stream and frame ids, the
//! connection's engine id, the decoded messages, and an actions slot the
//! handler fills in. Requests come from a process-wide pool and go back
//! to it as soon as the ack frame has taken the actions.

use crate::pool::{Pool, Pooled, Reset};
use crate::protocol::{Action, Message, Scope, TypedData};

/// Idle requests kept per process.
const MAX_IDLE_REQUESTS: usize = 1024;

static REQUEST_POOL: Pool<Request> = Pool::new(MAX_IDLE_REQUESTS);

/// One notification for the business handler.
#[derive(Debug, Default)]
pub struct Request {
    /// Stream id of the originating NOTIFY frame.
    pub stream_id: u64,
    /// Frame id of the originating NOTIFY frame.
    pub frame_id: u64,
    /// Engine id captured from the connection handshake.
    pub engine_id: String,
    /// Decoded messages from the NOTIFY payload.
    pub messages: Vec<Message>,
    /// Actions to carry back in the ack; filled by the handler.
    pub actions: Vec<Action>,
}

impl Request {
    /// Acquire a request from the process-wide pool.
    pub(crate) fn acquire() -> Pooled<Request> {
        REQUEST_POOL.acquire()
    }

    /// Look up a message by name.
    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.name == name)
    }

    /// Append a set-var action to the ack.
    pub fn set_var(&mut self, scope: Scope, name: impl Into<String>, value: TypedData) {
        self.actions.push(Action::SetVar {
            scope,
            name: name.into(),
            value,
        });
    }

    /// Append an unset-var action to the ack.
    pub fn unset_var(&mut self, scope: Scope, name: impl Into<String>) {
        self.actions.push(Action::UnsetVar {
            scope,
            name: name.into(),
        });
    }
}

impl Reset for Request {
    fn reset(&mut self) {
        self.stream_id = 0;
        self.frame_id = 0;
        self.engine_id.clear();
        self.messages.clear();
        self.actions.clear();
    }
}
