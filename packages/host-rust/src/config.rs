use crate::logging::LogFormat;

/// Message used when a function fails with something that has no message.
pub const DEFAULT_FALLBACK_ERROR_MESSAGE: &str = "exported function failed without an error message";

/// Message used when a function succeeds but its result cannot be transferred.
pub const DEFAULT_SERIALIZATION_ERROR_MESSAGE: &str =
    "exported function returned a value that cannot be transferred";

/// Invocation settings shared by the host and its callers.
///
/// Derives `clap::Args` so an embedding CLI can `#[command(flatten)]` it;
/// every field also reads a `MODBRIDGE_*` environment variable.
#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct InvocationConfig {
    /// Error message reported when a function raises a value without a message.
    #[arg(
        long,
        env = "MODBRIDGE_FALLBACK_ERROR_MESSAGE",
        default_value = DEFAULT_FALLBACK_ERROR_MESSAGE
    )]
    pub fallback_error_message: String,

    /// Error message reported when a function's result cannot be serialized.
    #[arg(
        long,
        env = "MODBRIDGE_SERIALIZATION_ERROR_MESSAGE",
        default_value = DEFAULT_SERIALIZATION_ERROR_MESSAGE
    )]
    pub serialization_error_message: String,

    /// Capacity of the module worker's request channel.
    #[arg(long, env = "MODBRIDGE_WORKER_CHANNEL_CAPACITY", default_value_t = 256)]
    pub worker_channel_capacity: usize,

    /// Log output format.
    #[arg(long, env = "MODBRIDGE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            fallback_error_message: DEFAULT_FALLBACK_ERROR_MESSAGE.to_string(),
            serialization_error_message: DEFAULT_SERIALIZATION_ERROR_MESSAGE.to_string(),
            worker_channel_capacity: 256,
            log_format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        invocation: InvocationConfig,
    }

    #[test]
    fn parsed_defaults_match_default_impl() {
        let cli = Cli::try_parse_from(["host"]).unwrap();
        assert_eq!(cli.invocation, InvocationConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "host",
            "--fallback-error-message",
            "x",
            "--serialization-error-message",
            "ser-err",
            "--worker-channel-capacity",
            "8",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.invocation.fallback_error_message, "x");
        assert_eq!(cli.invocation.serialization_error_message, "ser-err");
        assert_eq!(cli.invocation.worker_channel_capacity, 8);
        assert_eq!(cli.invocation.log_format, LogFormat::Json);
    }
}
