//! Request/response messages exchanged between a module host and its callers.
//!
//! Messages are internally tagged by a `type` field and encoded as named
//! `MsgPack` via `rmp_serde::to_vec_named()`. The transport carrying the bytes
//! is not defined here.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::outcome::ExecutionOutcome;
use crate::types::Value;

/// Caller-to-host messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Ask for the module's exported tree, with functions replaced by markers.
    #[serde(rename = "DESCRIBE")]
    Describe,

    /// Invoke the default export (`export == None`) or a named export.
    #[serde(rename = "INVOKE")]
    Invoke {
        #[serde(rename = "callId")]
        call_id: u64,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        export: Option<String>,
    },
}

/// Host-to-caller messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// The module's transport-safe exported tree.
    #[serde(rename = "EXPORTS")]
    Exports { body: Value },

    /// Outcome of an `Invoke` request.
    #[serde(rename = "OUTCOME")]
    Outcome {
        #[serde(rename = "callId")]
        call_id: u64,
        outcome: ExecutionOutcome,
    },

    /// The host could not route the request (unknown export, not a function,
    /// malformed request). `call_id` is 0 when the request could not be read.
    #[serde(rename = "REJECTED")]
    Rejected {
        #[serde(rename = "callId")]
        call_id: u64,
        message: String,
    },
}

impl Response {
    /// Wire name of the variant, for diagnostics.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Response::Exports { .. } => "EXPORTS",
            Response::Outcome { .. } => "OUTCOME",
            Response::Rejected { .. } => "REJECTED",
        }
    }
}

/// Errors from encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes a protocol message.
///
/// # Errors
///
/// Returns `CodecError::Encode` if the message holds a value that cannot be
/// serialized, such as a live function.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

/// Decodes a protocol message.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes are not a valid message of type `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
