//! Error types for the permission engine.
//!
//! Administrative errors (malformed patterns, bad chains, transaction
//! conflicts) are returned to the caller. Errors raised while a permission
//! check is running never leave `implies`; they fail closed and are logged.

use std::path::PathBuf;

/// A wildcard/DN pattern could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("malformed pattern {pattern:?}: {reason}")]
    Malformed { pattern: String, reason: String },
}

impl PatternError {
    pub(crate) fn malformed(pattern: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// A certificate chain does not have a valid shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Element `index` names an issuer that is not the subject of element `index + 1`.
    #[error("illegal chain at element {index}: issuer {issuer:?} does not match next subject {next_subject:?}")]
    Illegal {
        index: usize,
        issuer: String,
        next_subject: String,
    },

    /// The chain never reaches a self-signed root.
    #[error("incomplete chain of {length} element(s): no self-signed root")]
    Incomplete { length: usize },
}

/// Errors returned by the chain matcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// A textual condition, permission or rule encoding could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid encoding {input:?} at offset {position}: {reason}")]
pub struct SpecError {
    pub input: String,
    pub position: usize,
    pub reason: String,
}

/// A condition could not be created or raised an error while evaluating.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("unknown condition type: {kind}")]
    Unknown { kind: String },

    #[error("invalid arguments for condition {kind}: {reason}")]
    InvalidArguments { kind: String, reason: String },

    #[error("condition {kind} failed: {message}")]
    Failed { kind: String, message: String },

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Persistence failure. Logged by the services; in-memory state stays
/// authoritative.
#[derive(Debug, thiserror::Error)]
#[error("storage error at {}: {message}", .path.display())]
pub struct StorageError {
    pub path: PathBuf,
    pub message: String,
}

impl StorageError {
    pub(crate) fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Rule table administration errors.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// The table changed since `begin_update`; retry with a fresh update.
    #[error("concurrent update: transaction based on generation {expected}, table is at {actual}")]
    ConcurrentUpdate { expected: u64, actual: u64 },

    #[error("duplicate rule name: {name}")]
    DuplicateName { name: String },

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Condition(#[from] ConditionError),
}

impl TableError {
    /// Whether the caller should take a fresh snapshot and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentUpdate { .. })
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConcurrentUpdate { .. } => 3,
            Self::DuplicateName { .. } => 4,
            Self::Spec(_) => 4,
            Self::Condition(_) => 4,
        }
    }
}

/// Result type for table administration.
pub type TableResult<T> = Result<T, TableError>;
