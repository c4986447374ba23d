//! Identifiers for patient documents and their embedded notes.
//!
//! Two identifier shapes are used by the repository:
//!
//! - [`RecordId`] identifies a patient document. It is a UUID v4 held in *canonical* form:
//!   **32 lowercase hexadecimal characters**, no hyphens (for example
//!   `550e8400e29b41d4a716446655440000`). Externally supplied ids must already be canonical;
//!   hyphenated or uppercase forms are rejected rather than normalised.
//! - [`NoteId`] identifies a note inside its patient document. It is prefixed with a UTC
//!   timestamp so ids sort in creation order:
//!   `YYYYMMDDTHHMMSS.mmmZ-<canonical uuid>`.
//!
//! ## Sharded directory layout
//! For a canonical id `u`, file-backed stores keep the document under
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`, which keeps directory fan-out small.

mod note_id;
mod record_id;

pub use note_id::NoteId;
pub use record_id::RecordId;

/// Re-exported for callers that need the underlying UUID type.
pub use ::uuid::Uuid;

/// Error type for identifier parsing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
