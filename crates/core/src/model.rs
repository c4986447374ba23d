//! Patient and note entities.
//!
//! These are plain data shapes. Behaviour that touches storage lives in
//! [`crate::repositories`]; rules about validity live in [`crate::validation`].
//!
//! A patient document embeds its notes: a note has no storage identity outside its patient, so
//! appending a note is a full update of the patient document.

use crate::store::Revision;
use chrono::{DateTime, NaiveDate, Utc};
use pdr_uuid::{NoteId, RecordId};
use serde::{Deserialize, Serialize};

/// A patient document.
///
/// `id` is fixed for the lifetime of the record. `rev` is the store revision this copy was read
/// at (or `None` if it has never been persisted); it is not part of the stored body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: RecordId,
    pub given_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    /// Insertion order, most recent last.
    #[serde(default)]
    pub notes: Vec<Note>,
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker. Deleted patients are invisible to `find`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Revision>,
}

impl Patient {
    /// Creates a new, never-persisted patient with a fresh id and no notes.
    pub fn new(given_name: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            given_name: given_name.into(),
            family_name: None,
            birth_date: None,
            notes: Vec::new(),
            created_at: Utc::now(),
            deleted_at: None,
            rev: None,
        }
    }

    pub fn with_family_name(mut self, family_name: impl Into<String>) -> Self {
        self.family_name = Some(family_name.into());
        self
    }

    pub fn with_birth_date(mut self, birth_date: NaiveDate) -> Self {
        self.birth_date = Some(birth_date);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Id of the most recently created note, if any.
    pub fn last_note_id(&self) -> Option<&NoteId> {
        self.notes.iter().map(|n| &n.id).max()
    }

    pub fn note(&self, id: &NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| &n.id == id)
    }

    /// Builds a note for this patient whose id sorts after every existing note.
    ///
    /// The note is not attached; pass it to
    /// [`PatientRepository::add_note`](crate::repositories::PatientRepository::add_note) or push
    /// it onto `notes` before `save_or_update`.
    pub fn draft_note(&self, text: impl Into<String>) -> Note {
        Note::new(self.id, text, self.last_note_id())
    }
}

/// A clinical note embedded in a patient document.
///
/// `date` is stamped once by whoever creates the note and is never changed afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub text: String,
    pub date: DateTime<Utc>,
    /// The patient this note was written under.
    pub patient_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Note {
    /// Creates a note for `patient_id`. `previous` keeps note ids monotonic within a patient.
    pub fn new(patient_id: RecordId, text: impl Into<String>, previous: Option<&NoteId>) -> Self {
        let id = NoteId::generate(previous);
        Self {
            date: id.timestamp(),
            id,
            text: text.into(),
            patient_id,
            author: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}
