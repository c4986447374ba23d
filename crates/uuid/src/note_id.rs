use crate::{RecordId, UuidError};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::{fmt, str::FromStr};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// A time-prefixed note identifier.
///
/// Format: `YYYYMMDDTHHMMSS.mmmZ-<canonical uuid>`, for example
/// `20260111T143522.045Z-550e8400e29b41d4a716446655440000`.
///
/// Ordering compares the timestamp first and the UUID second, so sorting a patient's notes by
/// id yields creation order.
///
/// # Monotonicity
///
/// [`NoteId::generate`] given the previous id of the same patient always yields a strictly later
/// timestamp (bumped by 1 ms when the clock has not moved on).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId {
    timestamp: DateTime<Utc>,
    uuid: RecordId,
}

impl NoteId {
    /// Generate a new note id, strictly later than `previous` when given.
    pub fn generate(previous: Option<&NoteId>) -> Self {
        let now = truncate_to_millis(Utc::now());

        let timestamp = match previous {
            Some(prev) if now <= prev.timestamp => prev.timestamp + Duration::milliseconds(1),
            _ => now,
        };

        Self {
            timestamp,
            uuid: RecordId::new(),
        }
    }

    /// Timestamp component.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// UUID component.
    pub fn uuid(&self) -> &RecordId {
        &self.uuid
    }
}

// The textual form only carries milliseconds, so generated ids are truncated to keep
// display/parse lossless.
fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

impl FromStr for NoteId {
    type Err = UuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts_str, uuid_str) = s.split_once('-').ok_or_else(|| {
            UuidError::InvalidInput(format!("Invalid note id format: '{}'", s))
        })?;

        let ts_no_z = ts_str.strip_suffix('Z').ok_or_else(|| {
            UuidError::InvalidInput(format!("Timestamp must end with 'Z': '{}'", ts_str))
        })?;

        let naive = NaiveDateTime::parse_from_str(ts_no_z, TIMESTAMP_FORMAT).map_err(|e| {
            UuidError::InvalidInput(format!("Invalid timestamp format '{}': {}", ts_str, e))
        })?;

        Ok(Self {
            timestamp: DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc),
            uuid: RecordId::parse(uuid_str)?,
        })
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Z-{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.uuid
        )
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for NoteId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for NoteId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NoteId::from_str(&s).map_err(serde::de::Error::custom)
    }
}
