//! Validation of patient documents and note drafts.
//!
//! This is the single source of truth for what counts as a valid mutation. The repository calls
//! it before every write, and presentation layers may call the same functions on a draft to give
//! immediate feedback.
//!
//! Validation never fails with an error for expected bad input. It returns a
//! [`ValidationResult`] holding zero or more field-level [`Violation`]s; the repository wraps a
//! non-empty result in a [`ValidationError`] that also carries a banner-level summary.
//!
//! All functions here are pure: no I/O, no shared state, same answer for the same input.

use crate::model::{Note, Patient};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The field a violation refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    GivenName,
    Note,
    Author,
}

impl Field {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GivenName => "givenName",
            Self::Note => "note",
            Self::Author => "author",
        }
    }
}

/// What is wrong with a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    /// Missing, empty, or whitespace-only.
    Required,
    /// A note id appears more than once in the same patient.
    Duplicate,
    /// A note claims to belong to a different patient.
    Mismatch,
    /// A persisted note was removed or edited.
    Immutable,
}

impl ViolationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Duplicate => "duplicate",
            Self::Mismatch => "mismatch",
            Self::Immutable => "immutable",
        }
    }
}

/// A single field-level problem.
///
/// `index` is the position of the offending note within `notes` when the violation comes from
/// whole-patient validation; it is absent for draft-level checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub field: Field,
    pub kind: ViolationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl Violation {
    pub fn new(field: Field, kind: ViolationKind) -> Self {
        Self {
            field,
            kind,
            index: None,
        }
    }

    pub fn at(field: Field, kind: ViolationKind, index: usize) -> Self {
        Self {
            field,
            kind,
            index: Some(index),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]: {}", self.field.as_str(), i, self.kind.as_str()),
            None => write!(f, "{}: {}", self.field.as_str(), self.kind.as_str()),
        }
    }
}

/// Outcome of a validation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
    violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    fn extend(&mut self, other: ValidationResult) {
        self.violations.extend(other.violations);
    }

    /// Converts a failed result into the error returned by save operations.
    pub fn into_error(self) -> Option<ValidationError> {
        if self.is_ok() {
            None
        } else {
            Some(ValidationError::new(self.violations))
        }
    }
}

/// Banner-level summary attached to every failed save.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SummaryKind {
    UnableToSave,
}

/// A rejected save: a summary for the banner plus the field violations for inline hints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub summary: SummaryKind,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self {
            summary: SummaryKind::UnableToSave,
            violations,
        }
    }

    /// Returns true if any violation matches `field` and `kind`.
    pub fn has(&self, field: Field, kind: ViolationKind) -> bool {
        self.violations
            .iter()
            .any(|v| v.field == field && v.kind == kind)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to save")?;
        for (i, v) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { ", " };
            write!(f, "{sep}{v}")?;
        }
        Ok(())
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Validates the draft text of a new note.
///
/// Ok when `candidate_text` is non-empty after trimming; otherwise a single
/// `note: required` violation.
pub fn validate_note(candidate_text: &str) -> ValidationResult {
    let mut result = ValidationResult::ok();
    if is_blank(candidate_text) {
        result.push(Violation::new(Field::Note, ViolationKind::Required));
    }
    result
}

/// Validates a note about to be attached to `patient`.
pub(crate) fn validate_note_for(patient: &Patient, note: &Note) -> ValidationResult {
    let mut result = validate_note(&note.text);
    if note.patient_id != patient.id {
        result.push(Violation::new(Field::Note, ViolationKind::Mismatch));
    }
    if note.author.as_deref().is_some_and(is_blank) {
        result.push(Violation::new(Field::Author, ViolationKind::Required));
    }
    result
}

/// Validates every mutable field of a patient document, including each note.
pub fn validate_patient(patient: &Patient) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if is_blank(&patient.given_name) {
        result.push(Violation::new(Field::GivenName, ViolationKind::Required));
    }

    let mut seen = HashSet::with_capacity(patient.notes.len());
    for (index, note) in patient.notes.iter().enumerate() {
        if is_blank(&note.text) {
            result.push(Violation::at(Field::Note, ViolationKind::Required, index));
        }
        if !seen.insert(&note.id) {
            result.push(Violation::at(Field::Note, ViolationKind::Duplicate, index));
        }
        if note.patient_id != patient.id {
            result.push(Violation::at(Field::Note, ViolationKind::Mismatch, index));
        }
        if note.author.as_deref().is_some_and(is_blank) {
            result.push(Violation::at(Field::Author, ViolationKind::Required, index));
        }
    }

    result
}

/// Checks that `candidate` only appends to the clinical history persisted in `current`.
///
/// `candidate.notes` must start with exactly `current.notes`, in the same order; new notes may
/// only follow them. The first position where the persisted history diverges (or would be cut
/// short) is reported as `note: immutable`.
pub fn validate_transition(current: &Patient, candidate: &Patient) -> ValidationResult {
    let mut result = ValidationResult::ok();

    let diverged = current
        .notes
        .iter()
        .zip(&candidate.notes)
        .position(|(persisted, proposed)| persisted != proposed);

    match diverged {
        Some(index) => result.push(Violation::at(Field::Note, ViolationKind::Immutable, index)),
        None if candidate.notes.len() < current.notes.len() => result.push(Violation::at(
            Field::Note,
            ViolationKind::Immutable,
            candidate.notes.len(),
        )),
        None => {}
    }

    result
}

/// Runs whole-document validation plus the append-only check against `current`.
pub(crate) fn validate_update(current: &Patient, candidate: &Patient) -> ValidationResult {
    let mut result = validate_patient(candidate);
    result.extend(validate_transition(current, candidate));
    result
}
