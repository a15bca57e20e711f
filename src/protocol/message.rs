//! Notify message lists.
//!
//! A NOTIFY payload carries a list of messages, each declared in the
//! peer's SPOE configuration: message name, arg count byte, then that
//! many named typed values.

use bytes::{Buf, BufMut, Bytes};

use super::typed_data::{get_string, put_kv, put_string, TypedData};
use crate::error::{Result, SpopError};

/// One message from a NOTIFY frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Message name as configured on the peer (e.g. `check-client-ip`).
    pub name: String,
    /// Named arguments in wire order.
    pub args: Vec<(String, TypedData)>,
}

impl Message {
    /// Create a message with the given name and arguments.
    pub fn new(name: impl Into<String>, args: Vec<(String, TypedData)>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Look up an argument by name.
    pub fn arg(&self, name: &str) -> Option<&TypedData> {
        self.args.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Encode this message (name, arg count, args).
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        put_string(buf, &self.name);
        buf.put_u8(self.args.len() as u8);
        for (key, value) in &self.args {
            put_kv(buf, key, value);
        }
    }

    /// Decode one message from the buffer.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let name = get_string(buf)?;
        if !buf.has_remaining() {
            return Err(SpopError::Decode("truncated message arg count".to_string()));
        }
        let nb_args = buf.get_u8();
        let mut args = Vec::with_capacity(usize::from(nb_args));
        for _ in 0..nb_args {
            let key = get_string(buf)?;
            let value = TypedData::decode(buf)?;
            args.push((key, value));
        }
        Ok(Self { name, args })
    }
}

/// Decode messages until the payload is exhausted.
pub fn decode_messages(buf: &mut Bytes) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    while buf.has_remaining() {
        messages.push(Message::decode(buf)?);
    }
    Ok(messages)
}

/// Encode a message list back to wire form.
pub fn encode_messages<B: BufMut>(buf: &mut B, messages: &[Message]) {
    for message in messages {
        message.encode(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::net::Ipv4Addr;

    fn sample() -> Message {
        Message::new(
            "check-client-ip",
            vec![
                (
                    "ip".to_string(),
                    TypedData::Ipv4(Ipv4Addr::new(10, 0, 0, 1)),
                ),
                ("port".to_string(), TypedData::Uint32(443)),
            ],
        )
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = sample();
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let mut bytes = buf.freeze();
        assert_eq!(Message::decode(&mut bytes).unwrap(), msg);
        assert!(!bytes.has_remaining());
    }

    #[test]
    fn test_message_list_roundtrip() {
        let first = sample();
        let second = Message::new("log-request", vec![]);

        let mut buf = BytesMut::new();
        encode_messages(&mut buf, &[first.clone(), second.clone()]);

        let mut bytes = buf.freeze();
        let decoded = decode_messages(&mut bytes).unwrap();
        assert_eq!(decoded, vec![first, second]);
    }

    #[test]
    fn test_arg_lookup() {
        let msg = sample();
        assert_eq!(msg.arg("port"), Some(&TypedData::Uint32(443)));
        assert!(msg.arg("missing").is_none());
    }

    #[test]
    fn test_truncated_message_rejected() {
        let msg = sample();
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let full = buf.freeze();

        for cut in 0..full.len() {
            let mut partial = full.slice(..cut);
            assert!(Message::decode(&mut partial).is_err(), "cut at {}", cut);
        }
    }
}
