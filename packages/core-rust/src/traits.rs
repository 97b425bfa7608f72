use std::future::Future;

use async_trait::async_trait;

use crate::types::Value;

/// Callable behind a `Value::Function` export.
///
/// Functions take no arguments. Returning [`ThrownValue`] as the error signals
/// that the function raised something that is not an error, so callers fall
/// back to their own message instead of reading one from it.
#[async_trait]
pub trait ExportedFunction: Send + Sync {
    /// Run the function to completion.
    async fn call(&self) -> anyhow::Result<Value>;
}

/// Adapter that lets an async closure act as an [`ExportedFunction`].
pub(crate) struct FnExport<F>(pub(crate) F);

#[async_trait]
impl<F, Fut> ExportedFunction for FnExport<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self) -> anyhow::Result<Value> {
        (self.0)().await
    }
}

/// A raised value that carries no error message of its own.
#[derive(Debug, thiserror::Error)]
#[error("function raised a non-error value")]
pub struct ThrownValue(pub Value);
