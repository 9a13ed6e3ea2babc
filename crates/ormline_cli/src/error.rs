//! CLI error type.

use ormline_core::CoreError;
use thiserror::Error;

/// Errors raised while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The unit of work rejected an operation.
    #[error("scenario '{scenario}' failed: {source}")]
    Scenario {
        /// Scenario name.
        scenario: &'static str,
        /// Underlying error.
        #[source]
        source: CoreError,
    },

    /// Output could not be rendered.
    #[error("failed to render output: {0}")]
    Render(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
