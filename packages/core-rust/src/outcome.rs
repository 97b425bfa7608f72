//! Invocation outcomes: the wire record produced after running an exported
//! function, and the caller-facing `(data, error)` pair decoded from it.

use serde::{Deserialize, Deserializer, Serialize};

use crate::serializable::RoundTripCheck;
use crate::types::Value;

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Result of running a function once, before serializability is considered.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// The function completed and produced a value.
    Success(Value),
    /// The function failed. `message` is `None` when what it raised carried no
    /// error message.
    Failure { message: Option<String> },
}

// ---------------------------------------------------------------------------
// ExecutionOutcome
// ---------------------------------------------------------------------------

/// Normalized record of one invocation attempt, as sent across the boundary.
///
/// Invariants upheld by the constructors:
/// - `error == true` implies `data` holds the failure message and `serializable == false`.
/// - `error == false && serializable == false` implies `data` is absent.
///
/// On the wire `data` is omitted when absent; a present `Null` is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    data: Option<Value>,
    error: bool,
    serializable: bool,
}

/// Distinguishes a present `nil` from an absent field: a present field always
/// decodes to `Some`, so `Some(Value::Null)` survives the trip.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Value::deserialize(deserializer)?))
}

impl ExecutionOutcome {
    /// Outcome for a function that failed with `message`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            data: Some(Value::String(message.into())),
            error: true,
            serializable: false,
        }
    }

    /// Outcome for a function that returned `value`. The value is dropped when
    /// it is not serializable, since it could not be transmitted anyway.
    #[must_use]
    pub fn success(value: Value, serializable: bool) -> Self {
        Self {
            data: serializable.then_some(value),
            error: false,
            serializable,
        }
    }

    /// Builds the outcome for `invocation`, checking serializability with
    /// `check` and substituting `fallback_message` for message-less failures.
    pub fn from_invocation<C>(invocation: Invocation, fallback_message: &str, check: &C) -> Self
    where
        C: RoundTripCheck + ?Sized,
    {
        match invocation {
            Invocation::Success(value) => {
                let serializable = check.can_round_trip(&value);
                Self::success(value, serializable)
            }
            Invocation::Failure { message } => {
                Self::failure(message.unwrap_or_else(|| fallback_message.to_string()))
            }
        }
    }

    /// Result data, or the failure message when [`is_error`](Self::is_error).
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Whether the function failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Whether the result survived the round-trip check.
    #[must_use]
    pub fn is_serializable(&self) -> bool {
        self.serializable
    }
}

// ---------------------------------------------------------------------------
// DecodedOutcome
// ---------------------------------------------------------------------------

/// Error reported to the caller of a remote function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InvocationError {
    message: String,
}

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Final `(data, error)` pair handed to the caller.
///
/// Both fields are `None` only for a successful call whose serializable
/// result was itself absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedOutcome {
    pub data: Option<Value>,
    pub error: Option<InvocationError>,
}

impl DecodedOutcome {
    /// Converts into a `Result`, with the error taking precedence.
    ///
    /// # Errors
    ///
    /// Returns the decoded `InvocationError` if one is present.
    pub fn into_result(self) -> Result<Option<Value>, InvocationError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.data),
        }
    }
}

/// Decodes a wire outcome into the caller-facing pair.
///
/// A successful but unserializable result surfaces as an error built from
/// `serialization_error_message`. A falsy result that was serializable is
/// returned as data with no error.
#[must_use]
pub fn decode(outcome: &ExecutionOutcome, serialization_error_message: &str) -> DecodedOutcome {
    let data = if outcome.error {
        None
    } else {
        outcome.data.clone()
    };
    let mut error = outcome
        .error
        .then(|| InvocationError::new(message_text(outcome.data.as_ref())));

    if error.is_none() && !outcome.serializable && is_falsy(data.as_ref()) {
        error = Some(InvocationError::new(serialization_error_message));
    }

    DecodedOutcome { data, error }
}

fn is_falsy(data: Option<&Value>) -> bool {
    data.map_or(true, Value::is_falsy)
}

fn message_text(data: Option<&Value>) -> String {
    match data {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
