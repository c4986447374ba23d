//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the repository. The
//! intent is to avoid reading process-wide environment variables during request handling, which
//! can lead to inconsistent behaviour in multi-threaded runtimes and test harnesses. The
//! `*_from_env_value` helpers take the raw optional value so callers decide where it comes from.

use crate::constants::{
    DEFAULT_MERGE_ATTEMPTS, DEFAULT_PATIENT_DATA_DIR, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_STORE_ATTEMPTS, PATIENTS_DIR_NAME,
};
use crate::{PatientError, PatientResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Bounded exponential backoff for transient store failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_STORE_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> PatientResult<Self> {
        if max_attempts == 0 {
            return Err(PatientError::InvalidInput(
                "retry max_attempts must be at least 1".into(),
            ));
        }
        if base_delay > max_delay {
            return Err(PatientError::InvalidInput(
                "retry base_delay cannot exceed max_delay".into(),
            ));
        }

        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
        })
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// What `delete` does to a patient document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Mark the document deleted and keep it (clinical history is retained).
    #[default]
    Soft,
    /// Physically remove the document from the store.
    Hard,
}

impl FromStr for DeletionPolicy {
    type Err = PatientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" => Ok(Self::Soft),
            "hard" => Ok(Self::Hard),
            other => Err(PatientError::InvalidInput(format!(
                "unknown deletion policy '{}' (expected 'soft' or 'hard')",
                other
            ))),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    patient_data_dir: PathBuf,
    retry: RetryPolicy,
    max_merge_attempts: u32,
    deletion_policy: DeletionPolicy,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(
        patient_data_dir: PathBuf,
        retry: RetryPolicy,
        max_merge_attempts: u32,
        deletion_policy: DeletionPolicy,
    ) -> PatientResult<Self> {
        if patient_data_dir.as_os_str().is_empty() {
            return Err(PatientError::InvalidInput(
                "patient_data_dir cannot be empty".into(),
            ));
        }
        if max_merge_attempts == 0 {
            return Err(PatientError::InvalidInput(
                "max_merge_attempts must be at least 1".into(),
            ));
        }

        Ok(Self {
            patient_data_dir,
            retry,
            max_merge_attempts,
            deletion_policy,
        })
    }

    /// Defaults for everything except the data directory.
    pub fn with_defaults(patient_data_dir: PathBuf) -> PatientResult<Self> {
        Self::new(
            patient_data_dir,
            RetryPolicy::default(),
            DEFAULT_MERGE_ATTEMPTS,
            DeletionPolicy::default(),
        )
    }

    pub fn patient_data_dir(&self) -> &Path {
        &self.patient_data_dir
    }

    /// Root directory of the file-backed patient document store.
    pub fn patients_dir(&self) -> PathBuf {
        self.patient_data_dir.join(PATIENTS_DIR_NAME)
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn max_merge_attempts(&self) -> u32 {
        self.max_merge_attempts
    }

    pub fn deletion_policy(&self) -> DeletionPolicy {
        self.deletion_policy
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the patient data directory, falling back to [`DEFAULT_PATIENT_DATA_DIR`].
pub fn patient_data_dir_from_env_value(value: Option<String>) -> PathBuf {
    non_blank(value)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PATIENT_DATA_DIR))
}

/// Parse the store attempt count; `None` or blank yields the default.
pub fn retry_attempts_from_env_value(value: Option<String>) -> PatientResult<u32> {
    match non_blank(value) {
        None => Ok(DEFAULT_STORE_ATTEMPTS),
        Some(v) => match v.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(PatientError::InvalidInput(format!(
                "store retry attempts must be a positive integer, got '{}'",
                v
            ))),
        },
    }
}

/// Parse the deletion policy; `None` or blank yields [`DeletionPolicy::Soft`].
pub fn deletion_policy_from_env_value(value: Option<String>) -> PatientResult<DeletionPolicy> {
    non_blank(value)
        .map(|v| v.parse::<DeletionPolicy>())
        .transpose()
        .map(Option::unwrap_or_default)
}
