//! Error types for the expense tracker.
//!
//! Library crates use [`ExpenseError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::StageName;

/// Top-level error type for all expense tracker operations.
#[derive(Debug, thiserror::Error)]
pub enum ExpenseError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Model output does not conform to the structure a stage expects.
    #[error("schema violation in {stage} output: {message}")]
    SchemaViolation { stage: StageName, message: String },

    /// A stage needs pipeline state that an earlier stage did not produce.
    #[error("missing pipeline state: {stage} requires `{key}`")]
    MissingState { stage: StageName, key: &'static str },

    /// Credentials for an external service are missing or rejected.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// An existing warehouse table is incompatible with the expected columns.
    #[error("schema mismatch on table `{table}`: {message}")]
    SchemaMismatch { table: String, message: String },

    /// Network or service failure talking to the inference or warehouse backend.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// The inference service rejected a request for a non-transient reason.
    #[error("inference error: {status} - {message}")]
    Inference { status: u16, message: String },

    /// Run journal storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad identifiers, invalid input, misuse of state).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A pipeline stage failed; `source` is the triggering condition.
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: StageName,
        source: Box<ExpenseError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ExpenseError>;

impl ExpenseError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a schema violation for the given stage.
    pub fn schema_violation(stage: StageName, msg: impl Into<String>) -> Self {
        Self::SchemaViolation {
            stage,
            message: msg.into(),
        }
    }

    /// Create a missing-state error for the given stage and state key.
    pub fn missing_state(stage: StageName, key: &'static str) -> Self {
        Self::MissingState { stage, key }
    }

    /// Create a schema mismatch for the given table.
    pub fn schema_mismatch(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Tag an error with the stage it escaped from.
    pub fn in_stage(self, stage: StageName) -> Self {
        match self {
            already @ Self::Stage { .. } => already,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping any stage wrapper.
    pub fn condition(&self) -> &ExpenseError {
        match self {
            Self::Stage { source, .. } => source.condition(),
            other => other,
        }
    }

    /// The stage this error was raised in, if known.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            Self::Stage { stage, .. }
            | Self::SchemaViolation { stage, .. }
            | Self::MissingState { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ExpenseError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ExpenseError::missing_state(StageName::Classification, "extracted_receipt");
        assert_eq!(
            err.to_string(),
            "missing pipeline state: classification requires `extracted_receipt`"
        );
    }

    #[test]
    fn stage_wrapper_names_stage_and_condition() {
        let err = ExpenseError::TransientIo("connection refused".into()).in_stage(StageName::Logging);
        assert_eq!(
            err.to_string(),
            "stage logging failed: transient I/O error: connection refused"
        );
        assert!(matches!(err.condition(), ExpenseError::TransientIo(_)));
        assert_eq!(err.stage(), Some(StageName::Logging));
    }

    #[test]
    fn in_stage_does_not_double_wrap() {
        let err = ExpenseError::validation("bad")
            .in_stage(StageName::Extraction)
            .in_stage(StageName::Logging);
        assert_eq!(err.stage(), Some(StageName::Extraction));
        assert!(matches!(err.condition(), ExpenseError::Validation { .. }));
    }
}
