//! Constants used throughout the PDR core crate.
//!
//! Path and filename constants live here so the stores and the configuration agree on layout.

/// Default directory for patient data storage when no explicit directory is configured.
pub const DEFAULT_PATIENT_DATA_DIR: &str = "patient_data";

/// Directory name (under the patient data directory) holding patient documents.
pub const PATIENTS_DIR_NAME: &str = "patients";

/// Filename of a stored patient document envelope.
pub const PATIENT_DOC_FILENAME: &str = "patient.json";

/// Prefix of the per-writer temporary file used while a document is being replaced.
pub const PATIENT_DOC_TMP_PREFIX: &str = "patient.json.tmp";

/// Lock file guarding the revision check and replace of one document across processes.
pub const PATIENT_DOC_LOCK_FILENAME: &str = "patient.lock";

/// Default number of attempts for a store round-trip that fails transiently.
pub const DEFAULT_STORE_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubled on each further attempt.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;

/// Upper bound on a single retry delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 1_000;

/// Default number of read-merge-write rounds when appending a note races other writers.
pub const DEFAULT_MERGE_ATTEMPTS: u32 = 5;
