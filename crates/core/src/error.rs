use crate::store::{Revision, StoreError};
use crate::validation::{SummaryKind, ValidationError, Violation};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PatientError {
    /// The input was rejected; nothing was written.
    #[error("{0}")]
    Validation(ValidationError),
    /// Someone else wrote the document since the caller read it. Reload and reapply.
    #[error("conflict on patient {id}: document is at revision {current_rev:?}")]
    Conflict {
        id: String,
        current_rev: Option<Revision>,
    },
    #[error("patient not found: {id}")]
    NotFound { id: String },
    /// Transient store failure that persisted through every retry.
    #[error("document store unavailable after {attempts} attempt(s): {message}")]
    StoreUnavailable { attempts: u32, message: String },
    #[error("document store failure: {0}")]
    Storage(#[source] StoreError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to serialize patient: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize patient {id}: {source}")]
    Deserialization {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("repository task aborted: {0}")]
    TaskAborted(#[from] tokio::task::JoinError),
}

pub type PatientResult<T> = std::result::Result<T, PatientError>;

impl From<ValidationError> for PatientError {
    fn from(err: ValidationError) -> Self {
        PatientError::Validation(err)
    }
}

/// Consumer-facing description of a failed repository call.
///
/// Presentation code picks its treatment from `kind` (inline field hints for `validation`,
/// a reload prompt for `conflict`, a terminal message for `notFound`) without matching on
/// error strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Failure {
    #[serde(rename_all = "camelCase")]
    Validation {
        message: SummaryKind,
        field_violations: Vec<Violation>,
    },
    #[serde(rename_all = "camelCase")]
    Conflict { current_rev: Option<String> },
    NotFound { id: String },
    Unavailable { attempts: u32 },
    Internal { message: String },
}

impl PatientError {
    /// Structured view of this error for consumers.
    pub fn failure(&self) -> Failure {
        match self {
            PatientError::Validation(err) => Failure::Validation {
                message: err.summary,
                field_violations: err.violations.clone(),
            },
            PatientError::Conflict { current_rev, .. } => Failure::Conflict {
                current_rev: current_rev.as_ref().map(|r| r.to_string()),
            },
            PatientError::NotFound { id } => Failure::NotFound { id: id.clone() },
            PatientError::StoreUnavailable { attempts, .. } => Failure::Unavailable {
                attempts: *attempts,
            },
            other => Failure::Internal {
                message: other.to_string(),
            },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PatientError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PatientError::NotFound { .. })
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            PatientError::Validation(err) => Some(err),
            _ => None,
        }
    }
}
