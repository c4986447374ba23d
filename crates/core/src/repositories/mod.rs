//! Repository services over the document store.
//!
//! The repository owns validation, conflict handling and retry; stores only persist bytes
//! under a revision.

mod patient;
pub(crate) mod retry;

pub use patient::PatientRepository;
