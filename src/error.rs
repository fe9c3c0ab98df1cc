//! Typed error taxonomy shared by the engines, stores, and state machine.
//!
//! Engines return [`PipelineError`] so callers can react to the failure
//! class; the CLI boundary wraps these in `anyhow` context identifying the
//! operation and stage. Multi-column operations do not abort on the first
//! bad column: they record a [`ColumnFailure`] per offending column and
//! keep processing the rest.

use serde::{Deserialize, Serialize};

/// Top-level error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage-gate or state-machine rule was violated.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Navigation or edit attempted on a stage the workflow has not reached.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A stored record was looked up by an id that does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A named column does not exist in the dataset.
    #[error("column '{column}' not found")]
    ColumnNotFound { column: String },

    /// An operation demanded a column kind the column does not have.
    #[error("column '{column}' is not {expected}")]
    InvalidColumnType { column: String, expected: String },

    /// Too few non-missing observations for the requested computation.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The input could not be decoded or parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A compare-and-swap record update lost the race.
    #[error("conflicting update on {record}: expected revision {expected}, found {found}")]
    ConcurrencyConflict {
        record: String,
        expected: u64,
        found: u64,
    },

    /// Filesystem failure in a store.
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or artifact payload failed to (de)serialize.
    #[error("store codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn column_not_found(column: impl Into<String>) -> Self {
        PipelineError::ColumnNotFound {
            column: column.into(),
        }
    }

    pub fn invalid_column_type(column: impl Into<String>, expected: impl Into<String>) -> Self {
        PipelineError::InvalidColumnType {
            column: column.into(),
            expected: expected.into(),
        }
    }
}

/// A type alias for results using the top-level [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Per-column failure collected by operations that process many columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFailure {
    pub column: String,
    pub error: String,
}

impl ColumnFailure {
    pub fn new(column: impl Into<String>, error: &PipelineError) -> Self {
        Self {
            column: column.into(),
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_identifies_offending_column() {
        let err = PipelineError::column_not_found("income");
        assert_eq!(err.to_string(), "column 'income' not found");

        let err = PipelineError::invalid_column_type("region", "numeric");
        assert_eq!(err.to_string(), "column 'region' is not numeric");

        let err = PipelineError::NotFound("workflow 7f1a".to_string());
        assert_eq!(err.to_string(), "workflow 7f1a not found");
    }

    #[test]
    fn conflict_reports_both_revisions() {
        let err = PipelineError::ConcurrencyConflict {
            record: "stage 3".to_string(),
            expected: 4,
            found: 5,
        };
        assert_eq!(
            err.to_string(),
            "conflicting update on stage 3: expected revision 4, found 5"
        );
    }

    #[test]
    fn column_failure_carries_error_text() {
        let failure = ColumnFailure::new("age", &PipelineError::column_not_found("age"));
        assert_eq!(failure.column, "age");
        assert_eq!(failure.error, "column 'age' not found");
    }
}
