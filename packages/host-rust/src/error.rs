use modbridge_core::{ClassifyError, CodecError};

/// Errors raised by the host and by remote module callers.
///
/// Failures of the invoked function itself are never represented here: they
/// travel inside the `ExecutionOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("module has no default function export")]
    NoDefaultFunction,
    #[error("module has no export named `{export}`")]
    UnknownExport { export: String },
    #[error("export `{export}` is not a function")]
    NotAFunction { export: String },
    #[error("request rejected by host: {message}")]
    Rejected { message: String },
    #[error("unexpected response from host: {variant}")]
    UnexpectedResponse { variant: &'static str },
    #[error("module worker is not running")]
    WorkerStopped,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("transport failure: {0}")]
    Transport(#[from] anyhow::Error),
}
