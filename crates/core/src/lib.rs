//! # PDR Core
//!
//! Core business logic for the patient document repository.
//!
//! This crate contains the patient document model and everything needed to read and change it
//! safely:
//! - Validation of patients and clinical notes before anything is written
//! - A revision-checked [`DocumentStore`] abstraction with file-backed and in-memory stores
//! - [`PatientRepository`], which performs conditional writes, merges concurrent note appends
//!   and retries transient store failures
//!
//! **No presentation concerns**: rendering, navigation and user input belong to the caller.
//! Failures are reported as [`PatientError`], with [`PatientError::failure`] giving the
//! structured form consumers branch on.

pub mod config;
pub mod constants;
pub mod error;
pub mod model;
pub mod repositories;
pub mod store;
pub mod validation;

pub use config::{CoreConfig, DeletionPolicy, RetryPolicy};
pub use error::{Failure, PatientError, PatientResult};
pub use model::{Note, Patient};
pub use repositories::PatientRepository;
pub use store::{DocumentStore, FileStore, InMemoryStore, Revision, StoreError, StoredDocument};
pub use validation::{
    validate_note, validate_patient, validate_transition, Field, SummaryKind, ValidationError,
    ValidationResult, Violation, ViolationKind,
};

pub use pdr_uuid::{NoteId, RecordId};
