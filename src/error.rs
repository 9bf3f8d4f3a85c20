use thiserror::Error;

use crate::core::ledger::LedgerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    /// A delta check mismatched beyond its tolerance.
    #[error("Invariant violation [{label}] on {subject}: expected {expected}, got {actual}")]
    InvariantViolation {
        label: String,
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("Domain precondition violated: {0}")]
    Domain(String),

    #[error("Snapshot misuse: {0}")]
    Snapshot(String),

    #[error("Collaborator rejected call: {0}")]
    Collaborator(LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarnessError {
    pub(crate) fn violation(
        label: &str,
        subject: impl ToString,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        HarnessError::InvariantViolation {
            label: label.to_string(),
            subject: subject.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, HarnessError::InvariantViolation { .. })
    }

    /// The collaborator rejection, if this error is one.
    pub fn as_collaborator(&self) -> Option<&LedgerError> {
        match self {
            HarnessError::Collaborator(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
