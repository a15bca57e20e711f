//! SPOP frame encoding and decoding.
//!
//! On the wire every frame is a 4-byte big-endian length prefix followed
//! by the frame body:
//!
//! ```text
//! ┌────────┬─────────┬───────────┬──────────┬─────────┐
//! │ Type   │ Flags   │ Stream ID │ Frame ID │ Payload │
//! │ 1 byte │ 4 bytes │ varint    │ varint   │ ...     │
//! └────────┴─────────┴───────────┴──────────┴─────────┘
//! ```
//!
//! The payload layout depends on the frame type: key-value lists for the
//! handshake and disconnect frames, message lists for NOTIFY, action
//! lists for ACK.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::action::{decode_actions, encode_actions, Action};
use super::message::{decode_messages, encode_messages, Message};
use super::typed_data::{get_kv_list, put_kv, TypedData};
use super::varint::{get_varint, put_varint};
use crate::error::{Result, SpopError};

/// Protocol version this agent speaks.
pub const SPOP_VERSION: &str = "2.0";

/// Default maximum frame size, matching HAProxy's default bufsize slack.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16380;

/// Size of the length prefix preceding every frame body.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Frame flags (4-byte big-endian word after the type byte).
pub mod flags {
    /// Final fragment of the frame. Always set: fragmentation is not
    /// supported by this agent.
    pub const FIN: u32 = 0x0000_0001;
    /// Sender aborts the in-flight fragmented frame.
    pub const ABORT: u32 = 0x0000_0002;
}

mod type_byte {
    pub const HAPROXY_HELLO: u8 = 1;
    pub const HAPROXY_DISCONNECT: u8 = 2;
    pub const NOTIFY: u8 = 3;
    pub const AGENT_HELLO: u8 = 101;
    pub const AGENT_DISCONNECT: u8 = 102;
    pub const AGENT_ACK: u8 = 103;
}

/// Discriminant of a frame, as found in the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    HaproxyHello,
    HaproxyDisconnect,
    Notify,
    AgentHello,
    AgentDisconnect,
    AgentAck,
    Unknown(u8),
}

impl FrameType {
    fn from_byte(b: u8) -> Self {
        match b {
            type_byte::HAPROXY_HELLO => FrameType::HaproxyHello,
            type_byte::HAPROXY_DISCONNECT => FrameType::HaproxyDisconnect,
            type_byte::NOTIFY => FrameType::Notify,
            type_byte::AGENT_HELLO => FrameType::AgentHello,
            type_byte::AGENT_DISCONNECT => FrameType::AgentDisconnect,
            type_byte::AGENT_ACK => FrameType::AgentAck,
            other => FrameType::Unknown(other),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            FrameType::HaproxyHello => type_byte::HAPROXY_HELLO,
            FrameType::HaproxyDisconnect => type_byte::HAPROXY_DISCONNECT,
            FrameType::Notify => type_byte::NOTIFY,
            FrameType::AgentHello => type_byte::AGENT_HELLO,
            FrameType::AgentDisconnect => type_byte::AGENT_DISCONNECT,
            FrameType::AgentAck => type_byte::AGENT_ACK,
            FrameType::Unknown(b) => b,
        }
    }
}

/// Decoded payload of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// Handshake request from the peer.
    HaproxyHello {
        supported_versions: String,
        max_frame_size: u32,
        capabilities: String,
        healthcheck: bool,
        engine_id: String,
    },
    /// Handshake response from the agent.
    AgentHello {
        version: String,
        max_frame_size: u32,
        capabilities: String,
    },
    /// Peer-initiated teardown.
    HaproxyDisconnect { status_code: u32, message: String },
    /// Agent-side teardown acknowledgment.
    AgentDisconnect { status_code: u32, message: String },
    /// Stream notification carrying messages for the handler.
    Notify { messages: Vec<Message> },
    /// Acknowledgment carrying the handler's actions.
    AgentAck { actions: Vec<Action> },
    /// Unrecognized frame type, payload preserved as-is.
    Unknown { frame_type: u8, data: Bytes },
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Stream correlation id (0 outside the notify/ack flow).
    pub stream_id: u64,
    /// Frame correlation id within the stream.
    pub frame_id: u64,
    /// Raw flags word.
    pub flags: u32,
    /// Typed payload.
    pub payload: FramePayload,
}

impl Frame {
    fn new(stream_id: u64, frame_id: u64, payload: FramePayload) -> Self {
        Self {
            stream_id,
            frame_id,
            flags: flags::FIN,
            payload,
        }
    }

    /// Build an AGENT-HELLO answering a handshake.
    pub fn agent_hello(
        stream_id: u64,
        frame_id: u64,
        version: &str,
        max_frame_size: u32,
        capabilities: &str,
    ) -> Self {
        Self::new(
            stream_id,
            frame_id,
            FramePayload::AgentHello {
                version: version.to_string(),
                max_frame_size,
                capabilities: capabilities.to_string(),
            },
        )
    }

    /// Build an AGENT-DISCONNECT with a status code and reason.
    pub fn agent_disconnect(
        stream_id: u64,
        frame_id: u64,
        status_code: u32,
        message: &str,
    ) -> Self {
        Self::new(
            stream_id,
            frame_id,
            FramePayload::AgentDisconnect {
                status_code,
                message: message.to_string(),
            },
        )
    }

    /// Build an ACK mirroring a notify's stream and frame ids.
    pub fn agent_ack(stream_id: u64, frame_id: u64, actions: Vec<Action>) -> Self {
        Self::new(stream_id, frame_id, FramePayload::AgentAck { actions })
    }

    /// Build a HAPROXY-HELLO (peer side; used by tests and tooling).
    pub fn haproxy_hello(
        supported_versions: &str,
        max_frame_size: u32,
        capabilities: &str,
        healthcheck: bool,
        engine_id: &str,
    ) -> Self {
        Self::new(
            0,
            0,
            FramePayload::HaproxyHello {
                supported_versions: supported_versions.to_string(),
                max_frame_size,
                capabilities: capabilities.to_string(),
                healthcheck,
                engine_id: engine_id.to_string(),
            },
        )
    }

    /// Build a HAPROXY-DISCONNECT (peer side).
    pub fn haproxy_disconnect(status_code: u32, message: &str) -> Self {
        Self::new(
            0,
            0,
            FramePayload::HaproxyDisconnect {
                status_code,
                message: message.to_string(),
            },
        )
    }

    /// Build a NOTIFY (peer side).
    pub fn notify(stream_id: u64, frame_id: u64, messages: Vec<Message>) -> Self {
        Self::new(stream_id, frame_id, FramePayload::Notify { messages })
    }

    /// Frame type discriminant.
    pub fn frame_type(&self) -> FrameType {
        match &self.payload {
            FramePayload::HaproxyHello { .. } => FrameType::HaproxyHello,
            FramePayload::AgentHello { .. } => FrameType::AgentHello,
            FramePayload::HaproxyDisconnect { .. } => FrameType::HaproxyDisconnect,
            FramePayload::AgentDisconnect { .. } => FrameType::AgentDisconnect,
            FramePayload::Notify { .. } => FrameType::Notify,
            FramePayload::AgentAck { .. } => FrameType::AgentAck,
            FramePayload::Unknown { frame_type, .. } => FrameType::Unknown(*frame_type),
        }
    }

    /// Encode the frame to its full wire form, length prefix included.
    ///
    /// Fails with an encode error if the body exceeds `max_frame_size` —
    /// partial frames can never be completed later, so an oversized frame
    /// must not reach the wire at all.
    pub fn encode(&self, max_frame_size: u32) -> Result<Bytes> {
        let mut body = BytesMut::with_capacity(256);
        body.put_u8(self.frame_type().to_byte());
        body.put_u32(self.flags);
        put_varint(&mut body, self.stream_id);
        put_varint(&mut body, self.frame_id);
        self.encode_payload(&mut body);

        if body.len() > max_frame_size as usize {
            return Err(SpopError::Encode(format!(
                "frame body {} bytes exceeds negotiated max {} (type {:?}, stream {}, frame {})",
                body.len(),
                max_frame_size,
                self.frame_type(),
                self.stream_id,
                self.frame_id
            )));
        }

        let mut wire = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
        wire.put_u32(body.len() as u32);
        wire.extend_from_slice(&body);
        Ok(wire.freeze())
    }

    fn encode_payload<B: BufMut>(&self, buf: &mut B) {
        match &self.payload {
            FramePayload::HaproxyHello {
                supported_versions,
                max_frame_size,
                capabilities,
                healthcheck,
                engine_id,
            } => {
                put_kv(
                    buf,
                    "supported-versions",
                    &TypedData::String(supported_versions.clone()),
                );
                put_kv(buf, "max-frame-size", &TypedData::Uint32(*max_frame_size));
                put_kv(
                    buf,
                    "capabilities",
                    &TypedData::String(capabilities.clone()),
                );
                if *healthcheck {
                    put_kv(buf, "healthcheck", &TypedData::Bool(true));
                }
                put_kv(buf, "engine-id", &TypedData::String(engine_id.clone()));
            }
            FramePayload::AgentHello {
                version,
                max_frame_size,
                capabilities,
            } => {
                put_kv(buf, "version", &TypedData::String(version.clone()));
                put_kv(buf, "max-frame-size", &TypedData::Uint32(*max_frame_size));
                put_kv(
                    buf,
                    "capabilities",
                    &TypedData::String(capabilities.clone()),
                );
            }
            FramePayload::HaproxyDisconnect {
                status_code,
                message,
            }
            | FramePayload::AgentDisconnect {
                status_code,
                message,
            } => {
                put_kv(buf, "status-code", &TypedData::Uint32(*status_code));
                put_kv(buf, "message", &TypedData::String(message.clone()));
            }
            FramePayload::Notify { messages } => encode_messages(buf, messages),
            FramePayload::AgentAck { actions } => encode_actions(buf, actions),
            FramePayload::Unknown { data, .. } => buf.put_slice(data),
        }
    }

    /// Decode a frame body (everything after the length prefix).
    pub fn decode_body(mut body: Bytes) -> Result<Self> {
        if body.remaining() < 5 {
            return Err(SpopError::Decode("frame body too short".to_string()));
        }
        let type_byte = body.get_u8();
        let frame_flags = body.get_u32();
        let stream_id = get_varint(&mut body)?;
        let frame_id = get_varint(&mut body)?;

        let payload = match FrameType::from_byte(type_byte) {
            FrameType::HaproxyHello => decode_haproxy_hello(&mut body)?,
            FrameType::AgentHello => decode_agent_hello(&mut body)?,
            FrameType::HaproxyDisconnect => {
                let (status_code, message) = decode_disconnect(&mut body)?;
                FramePayload::HaproxyDisconnect {
                    status_code,
                    message,
                }
            }
            FrameType::AgentDisconnect => {
                let (status_code, message) = decode_disconnect(&mut body)?;
                FramePayload::AgentDisconnect {
                    status_code,
                    message,
                }
            }
            FrameType::Notify => FramePayload::Notify {
                messages: decode_messages(&mut body)?,
            },
            FrameType::AgentAck => FramePayload::AgentAck {
                actions: decode_actions(&mut body)?,
            },
            FrameType::Unknown(frame_type) => FramePayload::Unknown {
                frame_type,
                data: body.split_to(body.remaining()),
            },
        };

        Ok(Self {
            stream_id,
            frame_id,
            flags: frame_flags,
            payload,
        })
    }
}

fn decode_haproxy_hello(body: &mut Bytes) -> Result<FramePayload> {
    let mut supported_versions = String::new();
    let mut max_frame_size = DEFAULT_MAX_FRAME_SIZE;
    let mut capabilities = String::new();
    let mut healthcheck = false;
    let mut engine_id = String::new();

    // Unknown keys are skipped, per the protocol's forward-compat rule.
    for (key, value) in get_kv_list(body)? {
        match key.as_str() {
            "supported-versions" => supported_versions = require_str(&key, &value)?,
            "max-frame-size" => max_frame_size = require_u32(&key, &value)?,
            "capabilities" => capabilities = require_str(&key, &value)?,
            "healthcheck" => healthcheck = value.as_bool().unwrap_or(false),
            "engine-id" => engine_id = require_str(&key, &value)?,
            _ => {}
        }
    }

    Ok(FramePayload::HaproxyHello {
        supported_versions,
        max_frame_size,
        capabilities,
        healthcheck,
        engine_id,
    })
}

fn decode_agent_hello(body: &mut Bytes) -> Result<FramePayload> {
    let mut version = String::new();
    let mut max_frame_size = DEFAULT_MAX_FRAME_SIZE;
    let mut capabilities = String::new();

    for (key, value) in get_kv_list(body)? {
        match key.as_str() {
            "version" => version = require_str(&key, &value)?,
            "max-frame-size" => max_frame_size = require_u32(&key, &value)?,
            "capabilities" => capabilities = require_str(&key, &value)?,
            _ => {}
        }
    }

    Ok(FramePayload::AgentHello {
        version,
        max_frame_size,
        capabilities,
    })
}

fn decode_disconnect(body: &mut Bytes) -> Result<(u32, String)> {
    let mut status_code = 0;
    let mut message = String::new();

    for (key, value) in get_kv_list(body)? {
        match key.as_str() {
            "status-code" => status_code = require_u32(&key, &value)?,
            "message" => message = require_str(&key, &value)?,
            _ => {}
        }
    }

    Ok((status_code, message))
}

fn require_str(key: &str, value: &TypedData) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SpopError::Decode(format!("\"{}\" must be a string", key)))
}

fn require_u32(key: &str, value: &TypedData) -> Result<u32> {
    value
        .as_u32()
        .ok_or_else(|| SpopError::Decode(format!("\"{}\" must be an unsigned integer", key)))
}
