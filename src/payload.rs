//! The opaque message carried between a coordinator and a worker.
//!
//! A [`Payload`] is the runtime's view of a user value: exactly one of the
//! four kinds below, never more than one. Everywhere outside of
//! [`crate::codec`] the payload is treated as already-framed wire bytes —
//! the journal, the paging store and the reassignment path never need to
//! know what's inside.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A single message kind, tagged so the receiving side knows how to
/// interpret the payload bytes without any out-of-band context.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw octets, passed through untouched.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// A language-agnostic object graph (a user value serialised through
    /// `serde_json::Value`).
    Object(Value),
    /// A control string interpreted by the receiving endpoint itself,
    /// never handed to user code.
    Command(String),
}

impl Payload {
    pub fn from_job<J: Serialize>(job: &J) -> Result<Self> {
        Ok(Payload::Object(serde_json::to_value(job)?))
    }

    pub fn into_job<J: DeserializeOwned>(self) -> Result<J> {
        match self {
            Payload::Object(value) => Ok(serde_json::from_value(value)?),
            Payload::Bytes(_) => Err(Error::WrongPayloadKind("bytes")),
            Payload::Text(_) => Err(Error::WrongPayloadKind("text")),
            Payload::Command(_) => Err(Error::WrongPayloadKind("command")),
        }
    }
}
