//! Host-side view of a loaded module.

use std::time::Instant;

use modbridge_core::{to_transport, ExecutionOutcome, FunctionRef, Value};
use tracing::{info_span, Instrument};

use crate::config::InvocationConfig;
use crate::error::HostError;
use crate::executor::execute;

/// A module's live exported tree, as produced by the module loader.
///
/// Reloading a module means building a new `LoadedModule`; instances are
/// never mutated after construction.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    name: String,
    body: Value,
}

impl LoadedModule {
    pub fn new(name: impl Into<String>, body: Value) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    /// Module name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The live exported tree.
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The exported tree with functions replaced by markers.
    #[must_use]
    pub fn transport_body(&self) -> Value {
        to_transport(&self.body)
    }

    /// Finds the function behind the default export (`None`) or a named export.
    ///
    /// # Errors
    ///
    /// - `HostError::NoDefaultFunction` if `export` is `None` and the module is not a function
    /// - `HostError::UnknownExport` if no export has that name
    /// - `HostError::NotAFunction` if the export exists but holds data
    pub fn resolve(&self, export: Option<&str>) -> Result<FunctionRef, HostError> {
        match &self.body {
            Value::Shared(node) => node.with(|body| resolve_in(body, export)),
            body => resolve_in(body, export),
        }
    }

    /// Resolves and runs an export, recording duration and outcome on an
    /// `invocation` span.
    ///
    /// # Errors
    ///
    /// Only resolution failures are returned. Whatever the function does is
    /// captured in the `ExecutionOutcome`.
    pub async fn invoke(
        &self,
        export: Option<&str>,
        config: &InvocationConfig,
    ) -> Result<ExecutionOutcome, HostError> {
        let function = self.resolve(export)?;
        let export_name = export.unwrap_or("default");

        let span = info_span!(
            "invocation",
            module = %self.name,
            export = export_name,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let outcome = async move {
            let start = Instant::now();
            let outcome = execute(|| function.call(), &config.fallback_error_message).await;

            let label = match (outcome.is_error(), outcome.is_serializable()) {
                (true, _) => "error",
                (false, true) => "ok",
                (false, false) => "unserializable",
            };

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", label);

            tracing::info!(
                module = %self.name,
                export = export_name,
                duration_ms,
                outcome = label,
                "invocation complete"
            );

            outcome
        }
        .instrument(span)
        .await;

        Ok(outcome)
    }
}

/// Looks up `export` in a module body, seeing through one shared node per entry.
fn resolve_in(body: &Value, export: Option<&str>) -> Result<FunctionRef, HostError> {
    match (export, body) {
        (None, body) => body.function_ref().ok_or(HostError::NoDefaultFunction),
        (Some(name), Value::Map(entries)) => match entries.get(name) {
            Some(value) => value.function_ref().ok_or_else(|| HostError::NotAFunction {
                export: name.to_string(),
            }),
            None => Err(HostError::UnknownExport {
                export: name.to_string(),
            }),
        },
        (Some(name), _) => Err(HostError::UnknownExport {
            export: name.to_string(),
        }),
    }
}
