//! Ack action lists.
//!
//! An ACK payload carries the actions the agent wants the peer to apply:
//! set or unset a variable in one of the peer's scopes. Each action is a
//! type byte, an arg count byte, then the args in a fixed order.

use bytes::{Buf, BufMut, Bytes};

use super::typed_data::{get_string, put_string, TypedData};
use crate::error::{Result, SpopError};

const ACTION_SET_VAR: u8 = 1;
const ACTION_UNSET_VAR: u8 = 2;

const SET_VAR_NB_ARGS: u8 = 3;
const UNSET_VAR_NB_ARGS: u8 = 2;

/// Variable scope on the peer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Scope {
    Process = 0,
    Session = 1,
    Transaction = 2,
    Stream = 3,
    Request = 4,
    Response = 5,
}

impl Scope {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Scope::Process),
            1 => Ok(Scope::Session),
            2 => Ok(Scope::Transaction),
            3 => Ok(Scope::Stream),
            4 => Ok(Scope::Request),
            5 => Ok(Scope::Response),
            other => Err(SpopError::Decode(format!("unknown var scope: {}", other))),
        }
    }
}

/// One action to apply on the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Set `name` to `value` in `scope`.
    SetVar {
        scope: Scope,
        name: String,
        value: TypedData,
    },
    /// Remove `name` from `scope`.
    UnsetVar { scope: Scope, name: String },
}

impl Action {
    /// Encode this action.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Action::SetVar { scope, name, value } => {
                buf.put_u8(ACTION_SET_VAR);
                buf.put_u8(SET_VAR_NB_ARGS);
                buf.put_u8(*scope as u8);
                put_string(buf, name);
                value.encode(buf);
            }
            Action::UnsetVar { scope, name } => {
                buf.put_u8(ACTION_UNSET_VAR);
                buf.put_u8(UNSET_VAR_NB_ARGS);
                buf.put_u8(*scope as u8);
                put_string(buf, name);
            }
        }
    }

    /// Decode one action from the buffer.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 3 {
            return Err(SpopError::Decode("truncated action".to_string()));
        }
        let action_type = buf.get_u8();
        let nb_args = buf.get_u8();
        let scope = Scope::from_byte(buf.get_u8())?;

        match action_type {
            ACTION_SET_VAR => {
                if nb_args != SET_VAR_NB_ARGS {
                    return Err(SpopError::Decode(format!(
                        "set-var expects {} args, got {}",
                        SET_VAR_NB_ARGS, nb_args
                    )));
                }
                let name = get_string(buf)?;
                let value = TypedData::decode(buf)?;
                Ok(Action::SetVar { scope, name, value })
            }
            ACTION_UNSET_VAR => {
                if nb_args != UNSET_VAR_NB_ARGS {
                    return Err(SpopError::Decode(format!(
                        "unset-var expects {} args, got {}",
                        UNSET_VAR_NB_ARGS, nb_args
                    )));
                }
                let name = get_string(buf)?;
                Ok(Action::UnsetVar { scope, name })
            }
            other => Err(SpopError::Decode(format!("unknown action type: {}", other))),
        }
    }
}

/// Encode an action list to wire form.
pub fn encode_actions<B: BufMut>(buf: &mut B, actions: &[Action]) {
    for action in actions {
        action.encode(buf);
    }
}

/// Decode actions until the payload is exhausted.
pub fn decode_actions(buf: &mut Bytes) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    while buf.has_remaining() {
        actions.push(Action::decode(buf)?);
    }
    Ok(actions)
}
