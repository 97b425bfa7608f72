//! Invocation executor: runs a function once and captures how it settled.
//!
//! Failures, panics included, are folded into the returned record and never
//! propagate. The executor does not retry and does not log; callers that need
//! timeouts or cancellation wrap the function they pass in.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use modbridge_core::{
    ExecutionOutcome, Invocation, MsgPackRoundTrip, RoundTripCheck, ThrownValue, Value,
};

/// Runs `func` and reports whether it succeeded or failed.
///
/// An error's display text becomes the failure message, except for
/// [`ThrownValue`] which carries none. A panic with a string payload counts
/// as a failure with that message; any other payload carries none.
pub async fn invoke<F, Fut>(func: F) -> Invocation
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<Value>>,
{
    let settled = AssertUnwindSafe(async move { func().await })
        .catch_unwind()
        .await;

    match settled {
        Ok(Ok(value)) => Invocation::Success(value),
        Ok(Err(err)) => Invocation::Failure {
            message: error_message(&err),
        },
        Err(payload) => Invocation::Failure {
            message: panic_message(payload.as_ref()),
        },
    }
}

/// Runs `func` and builds the outcome record, checking serializability
/// with `MsgPack`.
pub async fn execute<F, Fut>(func: F, fallback_message: &str) -> ExecutionOutcome
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<Value>>,
{
    execute_with(&MsgPackRoundTrip, func, fallback_message).await
}

/// Same as [`execute`], with a caller-chosen serializability check.
pub async fn execute_with<C, F, Fut>(check: &C, func: F, fallback_message: &str) -> ExecutionOutcome
where
    C: RoundTripCheck + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<Value>>,
{
    let invocation = invoke(func).await;
    ExecutionOutcome::from_invocation(invocation, fallback_message, check)
}

fn error_message(err: &anyhow::Error) -> Option<String> {
    if err.downcast_ref::<ThrownValue>().is_some() {
        None
    } else {
        Some(err.to_string())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        Some((*msg).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}
