//! SPOP typed data values and key-value lists.
//!
//! Every value on the wire starts with a type byte: the low nibble is the
//! type id, the high nibble carries per-type flags. Booleans store their
//! value in flag bit `0x10`; integers follow as varints; strings and
//! binaries as varint length plus bytes; addresses as raw 4/16 bytes.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes};

use super::varint::{get_varint, put_varint};
use crate::error::{Result, SpopError};

/// Type ids (low nibble of the type byte).
mod type_id {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT32: u8 = 2;
    pub const UINT32: u8 = 3;
    pub const INT64: u8 = 4;
    pub const UINT64: u8 = 5;
    pub const IPV4: u8 = 6;
    pub const IPV6: u8 = 7;
    pub const STRING: u8 = 8;
    pub const BINARY: u8 = 9;
}

/// Flag bit carrying the boolean value.
const FLAG_TRUE: u8 = 0x10;

/// Mask selecting the type id nibble.
const TYPE_MASK: u8 = 0x0F;

/// A decoded SPOP value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedData {
    Null,
    Bool(bool),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    String(String),
    Binary(Bytes),
}

impl TypedData {
    /// Encode this value, type byte included.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            TypedData::Null => buf.put_u8(type_id::NULL),
            TypedData::Bool(v) => {
                buf.put_u8(type_id::BOOL | if *v { FLAG_TRUE } else { 0 });
            }
            TypedData::Int32(v) => {
                buf.put_u8(type_id::INT32);
                put_varint(buf, *v as u32 as u64);
            }
            TypedData::Uint32(v) => {
                buf.put_u8(type_id::UINT32);
                put_varint(buf, u64::from(*v));
            }
            TypedData::Int64(v) => {
                buf.put_u8(type_id::INT64);
                put_varint(buf, *v as u64);
            }
            TypedData::Uint64(v) => {
                buf.put_u8(type_id::UINT64);
                put_varint(buf, *v);
            }
            TypedData::Ipv4(addr) => {
                buf.put_u8(type_id::IPV4);
                buf.put_slice(&addr.octets());
            }
            TypedData::Ipv6(addr) => {
                buf.put_u8(type_id::IPV6);
                buf.put_slice(&addr.octets());
            }
            TypedData::String(s) => {
                buf.put_u8(type_id::STRING);
                put_varint(buf, s.len() as u64);
                buf.put_slice(s.as_bytes());
            }
            TypedData::Binary(b) => {
                buf.put_u8(type_id::BINARY);
                put_varint(buf, b.len() as u64);
                buf.put_slice(b);
            }
        }
    }

    /// Decode one value from the buffer.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(SpopError::Decode("truncated typed data".to_string()));
        }
        let type_byte = buf.get_u8();
        let flags = type_byte & !TYPE_MASK;

        match type_byte & TYPE_MASK {
            type_id::NULL => Ok(TypedData::Null),
            type_id::BOOL => Ok(TypedData::Bool(flags & FLAG_TRUE != 0)),
            type_id::INT32 => Ok(TypedData::Int32(get_varint(buf)? as u32 as i32)),
            type_id::UINT32 => Ok(TypedData::Uint32(get_varint(buf)? as u32)),
            type_id::INT64 => Ok(TypedData::Int64(get_varint(buf)? as i64)),
            type_id::UINT64 => Ok(TypedData::Uint64(get_varint(buf)?)),
            type_id::IPV4 => {
                let octets = take_bytes(buf, 4)?;
                let mut addr = [0u8; 4];
                addr.copy_from_slice(&octets);
                Ok(TypedData::Ipv4(Ipv4Addr::from(addr)))
            }
            type_id::IPV6 => {
                let octets = take_bytes(buf, 16)?;
                let mut addr = [0u8; 16];
                addr.copy_from_slice(&octets);
                Ok(TypedData::Ipv6(Ipv6Addr::from(addr)))
            }
            type_id::STRING => {
                let raw = get_length_prefixed(buf)?;
                let s = std::str::from_utf8(&raw)
                    .map_err(|e| SpopError::Decode(format!("invalid utf-8 string: {}", e)))?;
                Ok(TypedData::String(s.to_string()))
            }
            type_id::BINARY => Ok(TypedData::Binary(get_length_prefixed(buf)?)),
            other => Err(SpopError::Decode(format!(
                "unknown typed data type: {}",
                other
            ))),
        }
    }

    /// String view, if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedData::String(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce any integer value to u32.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            TypedData::Int32(v) => u32::try_from(*v).ok(),
            TypedData::Uint32(v) => Some(*v),
            TypedData::Int64(v) => u32::try_from(*v).ok(),
            TypedData::Uint64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Boolean view, if this value is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedData::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Read `len` raw bytes (zero-copy slice of the source buffer).
fn take_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    if buf.remaining() < len {
        return Err(SpopError::Decode(format!(
            "need {} bytes, {} remaining",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

/// Read a varint length followed by that many bytes.
fn get_length_prefixed(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_varint(buf)? as usize;
    take_bytes(buf, len)
}

/// Encode a string as varint length + bytes (no type byte).
pub fn put_string<B: BufMut>(buf: &mut B, s: &str) {
    put_varint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

/// Decode a varint-length-prefixed string (no type byte).
pub fn get_string(buf: &mut Bytes) -> Result<String> {
    let raw = get_length_prefixed(buf)?;
    std::str::from_utf8(&raw)
        .map(str::to_string)
        .map_err(|e| SpopError::Decode(format!("invalid utf-8 string: {}", e)))
}

/// Encode one key-value pair.
pub fn put_kv<B: BufMut>(buf: &mut B, key: &str, value: &TypedData) {
    put_string(buf, key);
    value.encode(buf);
}

/// Decode key-value pairs until the buffer is exhausted.
pub fn get_kv_list(buf: &mut Bytes) -> Result<Vec<(String, TypedData)>> {
    let mut items = Vec::new();
    while buf.has_remaining() {
        let key = get_string(buf)?;
        let value = TypedData::decode(buf)?;
        items.push((key, value));
    }
    Ok(items)
}
