//! Protocol module - SPOP wire format, framing, and frame types.
//!
//! This module implements the binary protocol:
//! - variable-length integers and typed data values
//! - message lists (NOTIFY) and action lists (ACK)
//! - frame body encoding/decoding with length-prefix framing
//! - frame codec for accumulating partial reads

mod action;
mod frame;
mod frame_codec;
mod message;
mod typed_data;
mod varint;

pub use action::{decode_actions, encode_actions, Action, Scope};
pub use frame::{
    flags, Frame, FramePayload, FrameType, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
    SPOP_VERSION,
};
pub use frame_codec::FrameCodec;
pub use message::{decode_messages, encode_messages, Message};
pub use typed_data::{get_kv_list, put_kv, TypedData};
pub use varint::{get_varint, put_varint, varint_len, MAX_VARINT_LEN};
