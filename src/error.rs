//! Error types for the record store.
//!
//! Errors are classified by what the caller can do about them:
//! - Fatal: the document on disk is missing pieces, malformed or could not be written.
//!   The triggering operation failed and nothing it did may be assumed durable.
//! - Caller input: the request was rejected before anything changed.
//! - Collaborator: an invoice builder failed while producing its artifact.

use std::path::PathBuf;
use thiserror::Error;

use crate::period::PeriodError;

/// A single structural violation found while validating a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("document failed schema validation ({} violation(s)): {}", .violations.len(), summarize(.violations))]
pub struct SchemaError {
    pub violations: Vec<SchemaViolation>,
}

fn summarize(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum StoreError {
    // Fatal
    #[error("Cannot create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Cannot write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Document lock poisoned")]
    LockPoisoned,

    #[error("Background task failed: {0}")]
    Task(String),

    // Caller input
    #[error("Customer number {0} is already used by another customer")]
    DuplicateCustomerNumber(u32),

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error("No customer to own invoice number; add a customer first")]
    NoCustomers,

    #[error("The {0} number counter is exhausted")]
    CounterExhausted(&'static str),

    // Collaborator
    #[error("Invoice rendering failed: {0}")]
    Render(String),
}

impl StoreError {
    /// Returns true when the dataset can no longer be trusted to match what the
    /// caller asked for: load or save failed, or the store is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::DataDir { .. }
                | StoreError::Io { .. }
                | StoreError::Parse { .. }
                | StoreError::Schema(_)
                | StoreError::Write { .. }
                | StoreError::LockPoisoned
                | StoreError::Task(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::LockPoisoned
    }
}
