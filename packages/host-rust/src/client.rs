//! Caller side of the boundary: discovers a remote module's exports and
//! turns invocation outcomes into `(data, error)` pairs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use modbridge_core::protocol::{self, Request, Response};
use modbridge_core::{
    decode, exports_any_function, named_function_exports, ClassifyError, DecodedOutcome,
    ExportedValue, ModuleExports, NamedFunctionExport, Value,
};
use tracing::debug;

use crate::config::InvocationConfig;
use crate::error::HostError;

/// Moves one encoded request to the host and returns the encoded response.
///
/// Implementations decide how bytes travel (channel, pipe, socket).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and waits for the matching response.
    async fn exchange(&self, request: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

/// A module living on the other side of a [`Transport`].
pub struct RemoteModule<T> {
    transport: T,
    body: Value,
    exports: ModuleExports,
    serialization_error_message: String,
    next_call_id: AtomicU64,
}

impl<T: Transport> RemoteModule<T> {
    /// Fetches the module's exported tree and classifies it.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or the host does not answer
    /// with its exports.
    pub async fn connect(transport: T, config: &InvocationConfig) -> Result<Self, HostError> {
        let body = describe(&transport).await?;
        Ok(Self {
            exports: ModuleExports::from_wire(body.clone()),
            body,
            transport,
            serialization_error_message: config.serialization_error_message.clone(),
            next_call_id: AtomicU64::new(1),
        })
    }

    /// Re-reads the exports, e.g. after the host reloaded the module.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn refresh(&mut self) -> Result<(), HostError> {
        let body = describe(&self.transport).await?;
        self.exports = ModuleExports::from_wire(body.clone());
        self.body = body;
        Ok(())
    }

    /// The exported tree as received, with function markers in place.
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Tagged view of the exports.
    #[must_use]
    pub fn exports(&self) -> &ModuleExports {
        &self.exports
    }

    /// Whether the module exports any function at all.
    #[must_use]
    pub fn exports_any_function(&self) -> bool {
        exports_any_function(&self.body)
    }

    /// Named function exports of the module.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError::NoExportedFunction` if there are none.
    pub fn named_functions(&self) -> Result<Vec<NamedFunctionExport>, ClassifyError> {
        named_function_exports(&self.body)
    }

    /// Invokes the default export (`None`) or a named export.
    ///
    /// The function's own failures arrive in `DecodedOutcome::error`; the
    /// `Err` side is reserved for calls that could not be made.
    ///
    /// # Errors
    ///
    /// - `HostError::NoDefaultFunction`, `UnknownExport` or `NotAFunction`
    ///   when the known exports rule the call out
    /// - `HostError::Rejected` when the host refuses it
    /// - transport, codec and protocol errors
    pub async fn call(&self, export: Option<&str>) -> Result<DecodedOutcome, HostError> {
        self.check_callable(export)?;

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::Invoke {
            call_id,
            export: export.map(str::to_string),
        };

        match exchange(&self.transport, &request).await? {
            Response::Outcome {
                call_id: id,
                outcome,
            } if id == call_id => {
                debug!(call_id, error = outcome.is_error(), "outcome received");
                Ok(decode(&outcome, &self.serialization_error_message))
            }
            Response::Rejected {
                call_id: id,
                message,
            } if id == call_id => Err(HostError::Rejected { message }),
            other => Err(HostError::UnexpectedResponse {
                variant: other.variant_name(),
            }),
        }
    }

    fn check_callable(&self, export: Option<&str>) -> Result<(), HostError> {
        match (export, &self.exports) {
            (None, exports) if exports.has_default_function() => Ok(()),
            (None, _) => Err(HostError::NoDefaultFunction),
            (Some(name), exports) => match exports.get(name) {
                Some(ExportedValue::FunctionPlaceholder) => Ok(()),
                Some(ExportedValue::Plain(_)) => Err(HostError::NotAFunction {
                    export: name.to_string(),
                }),
                None => Err(HostError::UnknownExport {
                    export: name.to_string(),
                }),
            },
        }
    }
}

async fn describe<T: Transport>(transport: &T) -> Result<Value, HostError> {
    match exchange(transport, &Request::Describe).await? {
        Response::Exports { body } => Ok(body),
        Response::Rejected { message, .. } => Err(HostError::Rejected { message }),
        other => Err(HostError::UnexpectedResponse {
            variant: other.variant_name(),
        }),
    }
}

async fn exchange<T: Transport>(transport: &T, request: &Request) -> Result<Response, HostError> {
    let bytes = transport.exchange(protocol::encode(request)?).await?;
    Ok(protocol::decode(&bytes)?)
}
