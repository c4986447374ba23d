//! Patient document repository.
//!
//! [`PatientRepository`] is the only way consumers read or change patient documents. Every
//! mutation follows the same discipline:
//!
//! 1. validate locally; a rejected input never reaches the store,
//! 2. re-read the current revision from the store (no in-process cache is trusted),
//! 3. issue one conditional write against that revision.
//!
//! A write presenting a stale revision fails with [`PatientError::Conflict`], never silently
//! overwriting another session's change. Appending a note is the one path that resolves
//! conflicts itself: it re-reads, re-merges and retries, because an append commutes with other
//! appends.
//!
//! Mutating operations run on a spawned task. Dropping the caller's future (for example when the
//! initiating workflow is torn down) does not cancel the operation between validation and the
//! write; it still completes or fails as a unit.

use super::retry::with_retry;
use crate::config::{CoreConfig, DeletionPolicy};
use crate::error::{PatientError, PatientResult};
use crate::model::{Note, Patient};
use crate::store::{DocumentStore, FileStore, Revision, StoreError, StoredDocument};
use crate::validation::{validate_note, validate_note_for, validate_patient, validate_update};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;

pub struct PatientRepository<S> {
    store: Arc<S>,
    cfg: Arc<CoreConfig>,
}

impl<S> Clone for PatientRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cfg: self.cfg.clone(),
        }
    }
}

impl PatientRepository<FileStore> {
    /// Repository over a [`FileStore`] rooted at the configured patients directory.
    pub fn open(cfg: Arc<CoreConfig>) -> Self {
        let store = Arc::new(FileStore::new(cfg.patients_dir()));
        Self::new(store, cfg)
    }
}

impl<S: DocumentStore> PatientRepository<S> {
    pub fn new(store: Arc<S>, cfg: Arc<CoreConfig>) -> Self {
        Self { store, cfg }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the current, non-deleted patient with `id`.
    ///
    /// # Errors
    ///
    /// [`PatientError::NotFound`] if no such document exists or it has been soft-deleted.
    pub async fn find(&self, id: &str) -> PatientResult<Patient> {
        let doc = self.get_document(id).await?;
        let patient = decode(doc)?;
        if patient.is_deleted() {
            return Err(PatientError::NotFound { id: id.to_string() });
        }

        tracing::debug!(patient_id = id, rev = ?patient.rev, "found patient");
        Ok(patient)
    }

    /// Returns every non-deleted patient, ordered by id.
    ///
    /// Documents that cannot be decoded are logged and skipped.
    pub async fn find_all(&self) -> PatientResult<Vec<Patient>> {
        let store = &self.store;
        let docs = with_retry(self.cfg.retry(), "list", "*", || store.list())
            .await
            .map_err(|e| self.store_failure(e))?;

        let mut patients: Vec<Patient> = docs
            .into_iter()
            .filter_map(|doc| match decode(doc) {
                Ok(patient) => Some(patient),
                Err(e) => {
                    tracing::warn!("skipping undecodable patient document: {}", e);
                    None
                }
            })
            .filter(|p| !p.is_deleted())
            .collect();
        patients.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(patients)
    }

    /// Creates `patient` (when it has no revision) or updates it (when it has one).
    ///
    /// Validation runs first and a rejected patient causes no store write. An update is only
    /// written if `patient.rev` still matches the stored revision, and it may only append to the
    /// persisted notes, never edit or drop them. `created_at` and `deleted_at` are owned by the
    /// repository and are carried over from the stored document.
    ///
    /// Returns the patient as stored, with its new revision.
    ///
    /// # Errors
    ///
    /// - [`PatientError::Validation`] for invalid input,
    /// - [`PatientError::Conflict`] if the document changed since `patient.rev` (or, for a
    ///   create, already exists),
    /// - [`PatientError::NotFound`] when updating a missing or deleted patient,
    /// - [`PatientError::StoreUnavailable`] if the store kept failing transiently.
    pub async fn save_or_update(&self, patient: Patient) -> PatientResult<Patient> {
        let this = self.clone();
        self.detached(async move { this.save_or_update_now(patient).await })
            .await
    }

    /// Appends `note` to the patient with `patient_id`, merging with the latest stored notes.
    ///
    /// The note is validated before anything is read. The merge re-reads the patient on every
    /// attempt, so a note appended by another session between this caller's last read and the
    /// write is kept. Re-submitting a note whose id is already stored is a no-op.
    ///
    /// # Errors
    ///
    /// - [`PatientError::Validation`] if the text is blank, the author is blank, or the note was
    ///   created for a different patient,
    /// - [`PatientError::NotFound`] for a missing or deleted patient,
    /// - [`PatientError::Conflict`] if every merge attempt lost a race.
    pub async fn add_note(&self, patient_id: &str, note: Note) -> PatientResult<Patient> {
        let this = self.clone();
        let patient_id = patient_id.to_string();
        self.detached(async move { this.add_note_now(&patient_id, note).await })
            .await
    }

    /// Deletes the patient with `id` according to the configured [`DeletionPolicy`].
    ///
    /// # Errors
    ///
    /// [`PatientError::NotFound`] if the patient does not exist or is already deleted;
    /// [`PatientError::Conflict`] if it changed between the read and the delete.
    pub async fn delete(&self, id: &str) -> PatientResult<()> {
        let this = self.clone();
        let id = id.to_string();
        self.detached(async move { this.delete_now(&id).await }).await
    }

    async fn detached<T, F>(&self, work: F) -> PatientResult<T>
    where
        F: Future<Output = PatientResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(work).await?
    }

    async fn save_or_update_now(&self, mut patient: Patient) -> PatientResult<Patient> {
        if let Some(err) = validate_patient(&patient).into_error() {
            tracing::warn!(patient_id = %patient.id, "rejected patient save: {}", err);
            return Err(err.into());
        }

        let id = patient.id.to_string();
        let Some(expected) = patient.rev.clone() else {
            return self.write(&id, patient, None).await;
        };

        let current = decode(self.get_document(&id).await?)?;
        if current.is_deleted() {
            return Err(PatientError::NotFound { id });
        }
        if current.rev.as_ref() != Some(&expected) {
            tracing::warn!(
                patient_id = %id,
                expected = %expected,
                current = ?current.rev,
                "stale revision on save"
            );
            return Err(PatientError::Conflict {
                id,
                current_rev: current.rev,
            });
        }

        if let Some(err) = validate_update(&current, &patient).into_error() {
            tracing::warn!(patient_id = %id, "rejected patient update: {}", err);
            return Err(err.into());
        }

        patient.created_at = current.created_at;
        patient.deleted_at = current.deleted_at;
        self.write(&id, patient, Some(&expected)).await
    }

    async fn add_note_now(&self, patient_id: &str, note: Note) -> PatientResult<Patient> {
        if let Some(err) = validate_note(&note.text).into_error() {
            tracing::warn!(patient_id, "rejected note: {}", err);
            return Err(err.into());
        }

        let mut last_seen: Option<Revision> = None;
        for attempt in 1..=self.cfg.max_merge_attempts() {
            let current = decode(self.get_document(patient_id).await?)?;
            if current.is_deleted() {
                return Err(PatientError::NotFound {
                    id: patient_id.to_string(),
                });
            }

            if let Some(err) = validate_note_for(&current, &note).into_error() {
                tracing::warn!(patient_id, "rejected note: {}", err);
                return Err(err.into());
            }

            if current.note(&note.id).is_some() {
                tracing::debug!(patient_id, note_id = %note.id, "note already stored");
                return Ok(current);
            }

            let expected = current.rev.clone();
            let mut merged = current;
            merged.notes.push(note.clone());
            if let Some(err) = validate_patient(&merged).into_error() {
                return Err(err.into());
            }

            match self.write(patient_id, merged, expected.as_ref()).await {
                Err(PatientError::Conflict { current_rev, .. }) => {
                    tracing::warn!(patient_id, attempt, "note append lost a race, re-merging");
                    last_seen = current_rev;
                }
                result => return result,
            }
        }

        Err(PatientError::Conflict {
            id: patient_id.to_string(),
            current_rev: last_seen,
        })
    }

    async fn delete_now(&self, id: &str) -> PatientResult<()> {
        let mut current = decode(self.get_document(id).await?)?;
        if current.is_deleted() {
            return Err(PatientError::NotFound { id: id.to_string() });
        }
        let Some(rev) = current.rev.clone() else {
            return Err(PatientError::NotFound { id: id.to_string() });
        };

        match self.cfg.deletion_policy() {
            DeletionPolicy::Soft => {
                current.deleted_at = Some(Utc::now());
                self.write(id, current, Some(&rev)).await?;
            }
            DeletionPolicy::Hard => {
                let store = &self.store;
                with_retry(self.cfg.retry(), "remove", id, || store.remove(id, &rev))
                    .await
                    .map_err(|e| self.store_failure(e))?;
                tracing::info!(patient_id = id, "patient removed");
            }
        }

        Ok(())
    }

    async fn get_document(&self, id: &str) -> PatientResult<StoredDocument> {
        let store = &self.store;
        with_retry(self.cfg.retry(), "get", id, || store.get(id))
            .await
            .map_err(|e| self.store_failure(e))
    }

    /// The single store mutation of a save: a conditional put of `patient` without its `rev`.
    async fn write(
        &self,
        id: &str,
        mut patient: Patient,
        expected: Option<&Revision>,
    ) -> PatientResult<Patient> {
        patient.rev = None;
        let body = serde_json::to_value(&patient).map_err(PatientError::Serialization)?;

        let store = &self.store;
        let rev = with_retry(self.cfg.retry(), "put", id, || {
            store.put(id, body.clone(), expected)
        })
        .await
        .map_err(|e| self.store_failure(e))?;

        tracing::info!(
            patient_id = id,
            rev = %rev,
            notes = patient.notes.len(),
            "patient saved"
        );
        patient.rev = Some(rev);
        Ok(patient)
    }

    fn store_failure(&self, err: StoreError) -> PatientError {
        match err {
            StoreError::NotFound { id } => PatientError::NotFound { id },
            StoreError::RevMismatch { id, current } => {
                tracing::warn!(patient_id = %id, current = ?current, "revision mismatch");
                PatientError::Conflict {
                    id,
                    current_rev: current,
                }
            }
            StoreError::Unavailable(message) => PatientError::StoreUnavailable {
                attempts: self.cfg.retry().max_attempts(),
                message,
            },
            other => PatientError::Storage(other),
        }
    }
}

fn decode(doc: StoredDocument) -> PatientResult<Patient> {
    let mut patient: Patient =
        serde_json::from_value(doc.body).map_err(|source| PatientError::Deserialization {
            id: doc.id.clone(),
            source,
        })?;
    patient.rev = Some(doc.rev);
    Ok(patient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::store::{InMemoryStore, StoreResult};
    use crate::validation::{Field, Violation, ViolationKind};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_cfg(deletion_policy: DeletionPolicy) -> Arc<CoreConfig> {
        let retry =
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)).unwrap();
        Arc::new(
            CoreConfig::new(PathBuf::from("/unused"), retry, 5, deletion_policy)
                .expect("CoreConfig::new should succeed"),
        )
    }

    fn memory_repo() -> PatientRepository<InMemoryStore> {
        PatientRepository::new(Arc::new(InMemoryStore::new()), test_cfg(DeletionPolicy::Soft))
    }

    async fn stored_patient(repo: &PatientRepository<InMemoryStore>) -> Patient {
        repo.save_or_update(Patient::new("someName"))
            .await
            .expect("create should succeed")
    }

    /// Wraps the in-memory store with injected transient failures and slow writes.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        failures_left: AtomicU32,
        calls: AtomicU32,
        put_delay: Duration,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                ..Self::default()
            }
        }

        fn trip(&self) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("injected".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn get(&self, id: &str) -> StoreResult<StoredDocument> {
            self.trip()?;
            self.inner.get(id).await
        }

        async fn put(
            &self,
            id: &str,
            body: serde_json::Value,
            expected_rev: Option<&Revision>,
        ) -> StoreResult<Revision> {
            self.trip()?;
            tokio::time::sleep(self.put_delay).await;
            self.inner.put(id, body, expected_rev).await
        }

        async fn remove(&self, id: &str, expected_rev: &Revision) -> StoreResult<()> {
            self.trip()?;
            self.inner.remove(id, expected_rev).await
        }

        async fn list(&self) -> StoreResult<Vec<StoredDocument>> {
            self.trip()?;
            self.inner.list().await
        }
    }

    /// Lands a competing note append between the repository's read and its conditional write,
    /// for the next `races` updates.
    #[derive(Default)]
    struct RacingStore {
        inner: InMemoryStore,
        races_left: AtomicU32,
        puts: AtomicU32,
    }

    impl RacingStore {
        fn racing(races: u32) -> Self {
            Self {
                races_left: AtomicU32::new(races),
                ..Self::default()
            }
        }

        async fn append_competing_note(&self, id: &str) -> StoreResult<()> {
            let doc = self.inner.get(id).await?;
            let mut patient: Patient =
                serde_json::from_value(doc.body).expect("stored body should decode");
            let note = patient.draft_note("competing note");
            patient.notes.push(note);
            let body = serde_json::to_value(&patient).expect("patient should encode");
            self.inner.put(id, body, Some(&doc.rev)).await.map(|_| ())
        }
    }

    #[async_trait]
    impl DocumentStore for RacingStore {
        async fn get(&self, id: &str) -> StoreResult<StoredDocument> {
            self.inner.get(id).await
        }

        async fn put(
            &self,
            id: &str,
            body: serde_json::Value,
            expected_rev: Option<&Revision>,
        ) -> StoreResult<Revision> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            let race = expected_rev.is_some()
                && self
                    .races_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if race {
                self.append_competing_note(id).await?;
            }
            self.inner.put(id, body, expected_rev).await
        }

        async fn remove(&self, id: &str, expected_rev: &Revision) -> StoreResult<()> {
            self.inner.remove(id, expected_rev).await
        }

        async fn list(&self) -> StoreResult<Vec<StoredDocument>> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn blank_note_is_rejected_without_store_writes() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let writes_before = repo.store().write_count();

        for text in ["", "   ", "\n\t"] {
            let mut candidate = patient.clone();
            candidate.notes.push(candidate.draft_note(text));

            let err = repo
                .save_or_update(candidate)
                .await
                .expect_err("blank note should be rejected");
            let validation = err.validation().expect("should be a validation error");
            assert_eq!(
                validation.violations,
                vec![Violation::at(Field::Note, ViolationKind::Required, 0)]
            );

            let err = repo
                .add_note(&patient.id.to_string(), patient.draft_note(text))
                .await
                .expect_err("blank note should be rejected");
            assert!(err
                .validation()
                .is_some_and(|v| v.has(Field::Note, ViolationKind::Required)));
        }

        assert_eq!(repo.store().write_count(), writes_before);
        let reloaded = repo.find(&patient.id.to_string()).await.unwrap();
        assert!(reloaded.notes.is_empty());
        assert_eq!(reloaded.rev, patient.rev);
    }

    #[tokio::test]
    async fn saving_a_note_appends_exactly_one_and_advances_rev() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let before = patient.rev.clone().unwrap();

        let mut candidate = patient.clone();
        candidate.notes.push(candidate.draft_note("some note"));
        let saved = repo.save_or_update(candidate).await.expect("save should succeed");

        assert_eq!(saved.notes.len(), 1);
        assert_eq!(saved.notes[0].text, "some note");
        let after = saved.rev.clone().unwrap();
        assert!(after.generation() > before.generation());

        let found = repo.find(&patient.id.to_string()).await.unwrap();
        assert_eq!(found, saved);
    }

    #[tokio::test]
    async fn add_note_appends_to_latest_document() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let id = patient.id.to_string();

        let saved = repo
            .add_note(&id, patient.draft_note("some note").with_author("Dr Jones"))
            .await
            .expect("add_note should succeed");

        assert_eq!(saved.notes.len(), 1);
        assert_eq!(saved.notes[0].text, "some note");
        assert_eq!(saved.notes[0].author.as_deref(), Some("Dr Jones"));
        assert_eq!(saved.rev.as_ref().unwrap().generation(), 2);
        assert_eq!(repo.find(&id).await.unwrap().notes, saved.notes);
    }

    #[tokio::test]
    async fn add_note_is_idempotent_per_note_id() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let id = patient.id.to_string();
        let note = patient.draft_note("once");

        let first = repo.add_note(&id, note.clone()).await.unwrap();
        let writes = repo.store().write_count();
        let second = repo.add_note(&id, note).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.store().write_count(), writes);
    }

    #[tokio::test]
    async fn add_note_rejects_note_for_another_patient() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let other = Patient::new("other");

        let err = repo
            .add_note(&patient.id.to_string(), other.draft_note("misfiled"))
            .await
            .expect_err("foreign note should be rejected");
        assert!(err
            .validation()
            .is_some_and(|v| v.has(Field::Note, ViolationKind::Mismatch)));
    }

    #[tokio::test]
    async fn find_missing_is_not_found() {
        let repo = memory_repo();
        let err = repo.find("does-not-exist").await.expect_err("should be missing");
        assert!(matches!(err, PatientError::NotFound { ref id } if id == "does-not-exist"));
    }

    #[tokio::test]
    async fn find_is_idempotent_without_writes() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let id = patient.id.to_string();

        let first = repo.find(&id).await.unwrap();
        let second = repo.find(&id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn creating_an_existing_patient_conflicts() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        assert_eq!(patient.rev.as_ref().unwrap().generation(), 1);

        let mut again = patient.clone();
        again.rev = None;
        let err = repo.save_or_update(again).await.expect_err("should conflict");
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn stale_revision_conflicts_and_leaves_store_unchanged() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;

        let mut fresh = patient.clone();
        fresh.given_name = "renamed".into();
        let fresh = repo.save_or_update(fresh).await.unwrap();
        let writes = repo.store().write_count();

        let mut stale = patient.clone();
        stale.notes.push(stale.draft_note("late"));
        match repo.save_or_update(stale).await {
            Err(PatientError::Conflict { current_rev, .. }) => {
                assert_eq!(current_rev, fresh.rev);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }

        assert_eq!(repo.store().write_count(), writes);
        assert_eq!(repo.find(&patient.id.to_string()).await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn concurrent_saves_from_same_rev_have_one_winner() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;

        let mut a = patient.clone();
        a.notes.push(a.draft_note("from session a"));
        let mut b = patient.clone();
        b.notes.push(b.draft_note("from session b"));

        let (ra, rb) = tokio::join!(repo.save_or_update(a.clone()), repo.save_or_update(b.clone()));

        let (winner, loser_note) = match (ra, rb) {
            (Ok(w), Err(e)) => {
                assert!(e.is_conflict(), "loser should conflict, got {e:?}");
                (w, b.notes[0].clone())
            }
            (Err(e), Ok(w)) => {
                assert!(e.is_conflict(), "loser should conflict, got {e:?}");
                (w, a.notes[0].clone())
            }
            other => panic!("expected exactly one winner, got {other:?}"),
        };
        assert_eq!(winner.notes.len(), 1);

        // The loser reloads and reapplies its change.
        let mut retry = repo.find(&patient.id.to_string()).await.unwrap();
        retry.notes.push(loser_note.clone());
        let merged = repo.save_or_update(retry).await.expect("retry should succeed");

        assert_eq!(merged.notes.len(), 2);
        assert!(merged.notes.contains(&winner.notes[0]));
        assert!(merged.notes.contains(&loser_note));
    }

    #[tokio::test]
    async fn add_note_re_merges_after_losing_a_race() {
        let store = Arc::new(RacingStore::racing(1));
        let repo = PatientRepository::new(store.clone(), test_cfg(DeletionPolicy::Soft));
        let patient = repo.save_or_update(Patient::new("someName")).await.unwrap();
        let base = patient.rev.clone().unwrap();
        let id = patient.id.to_string();

        let saved = repo
            .add_note(&id, patient.draft_note("my note"))
            .await
            .expect("append should succeed after re-merging");

        let texts: Vec<&str> = saved.notes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["competing note", "my note"]);
        assert_eq!(saved.rev.as_ref().unwrap().generation(), base.generation() + 2);
        assert_eq!(repo.find(&id).await.unwrap(), saved);
        // create, the lost append, the winning append
        assert_eq!(store.puts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn add_note_gives_up_after_max_merge_attempts() {
        let store = Arc::new(RacingStore::racing(u32::MAX));
        let cfg = test_cfg(DeletionPolicy::Soft);
        let repo = PatientRepository::new(store.clone(), cfg.clone());
        let patient = repo.save_or_update(Patient::new("someName")).await.unwrap();
        let id = patient.id.to_string();

        let err = repo
            .add_note(&id, patient.draft_note("never lands"))
            .await
            .expect_err("every attempt loses its race");

        let stored = repo.find(&id).await.unwrap();
        match err {
            PatientError::Conflict { current_rev, .. } => assert_eq!(current_rev, stored.rev),
            other => panic!("expected Conflict, got {other:?}"),
        }
        let attempts = cfg.max_merge_attempts() as usize;
        assert_eq!(stored.notes.len(), attempts);
        assert!(stored.notes.iter().all(|n| n.text == "competing note"));
        assert_eq!(store.puts.load(Ordering::SeqCst) as usize, 1 + attempts);
    }

    #[tokio::test]
    async fn concurrent_note_appends_are_all_kept() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let id = patient.id.to_string();

        let mut handles = Vec::new();
        for n in 0..4 {
            let repo = repo.clone();
            let id = id.clone();
            let note = patient.draft_note(format!("note {n}"));
            handles.push(tokio::spawn(async move { repo.add_note(&id, note).await }));
        }
        for handle in handles {
            handle
                .await
                .expect("task should not panic")
                .expect("append should succeed");
        }

        let found = repo.find(&id).await.unwrap();
        assert_eq!(found.notes.len(), 4);
        for n in 0..4 {
            let text = format!("note {n}");
            assert!(found.notes.iter().any(|note| note.text == text));
        }
        assert_eq!(found.rev.unwrap().generation(), 5);
    }

    #[tokio::test]
    async fn update_cannot_rewrite_history() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let saved = repo
            .add_note(&patient.id.to_string(), patient.draft_note("original"))
            .await
            .unwrap();
        let writes = repo.store().write_count();

        let mut edited = saved.clone();
        edited.notes[0].text = "rewritten".into();
        let err = repo.save_or_update(edited).await.expect_err("edit should fail");
        assert!(err
            .validation()
            .is_some_and(|v| v.has(Field::Note, ViolationKind::Immutable)));

        let mut dropped = saved.clone();
        dropped.notes.clear();
        let err = repo.save_or_update(dropped).await.expect_err("removal should fail");
        assert!(err
            .validation()
            .is_some_and(|v| v.has(Field::Note, ViolationKind::Immutable)));

        assert_eq!(repo.store().write_count(), writes);
    }

    #[tokio::test]
    async fn repository_owned_fields_are_preserved_on_update() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;

        let mut candidate = patient.clone();
        candidate.created_at = Utc::now() + chrono::Duration::days(1);
        candidate.family_name = Some("Smith".into());
        let saved = repo.save_or_update(candidate).await.unwrap();

        assert_eq!(saved.created_at, patient.created_at);
        assert_eq!(saved.family_name.as_deref(), Some("Smith"));
    }

    #[tokio::test]
    async fn soft_delete_hides_patient_but_keeps_document() {
        let repo = memory_repo();
        let patient = stored_patient(&repo).await;
        let id = patient.id.to_string();
        let writes = repo.store().write_count();

        repo.delete(&id).await.expect("delete should succeed");
        assert_eq!(repo.store().write_count(), writes + 1);

        assert!(repo.find(&id).await.unwrap_err().is_not_found());
        assert!(repo.find_all().await.unwrap().is_empty());
        let raw = repo.store().get(&id).await.expect("document should remain");
        assert!(raw.body.get("deleted_at").is_some());

        assert!(repo.delete(&id).await.unwrap_err().is_not_found());
        let err = repo
            .add_note(&id, patient.draft_note("too late"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let err = repo.save_or_update(raw_patient(&raw)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    fn raw_patient(doc: &StoredDocument) -> Patient {
        let mut patient: Patient = serde_json::from_value(doc.body.clone()).unwrap();
        patient.deleted_at = None;
        patient.rev = Some(doc.rev.clone());
        patient
    }

    #[tokio::test]
    async fn hard_delete_removes_document() {
        let repo =
            PatientRepository::new(Arc::new(InMemoryStore::new()), test_cfg(DeletionPolicy::Hard));
        let patient = repo.save_or_update(Patient::new("someName")).await.unwrap();
        let id = patient.id.to_string();

        repo.delete(&id).await.expect("delete should succeed");
        assert!(matches!(
            repo.store().get(&id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(repo.delete(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let repo = memory_repo();
        assert!(repo.delete("does-not-exist").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn find_all_returns_live_patients_in_id_order() {
        let repo = memory_repo();
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            ids.push(repo.save_or_update(Patient::new(name)).await.unwrap().id);
        }
        repo.delete(&ids[1].to_string()).await.unwrap();

        let mut expected = vec![ids[0], ids[2]];
        expected.sort();
        let found: Vec<_> = repo.find_all().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = Arc::new(FlakyStore::failing(2));
        let repo = PatientRepository::new(store.clone(), test_cfg(DeletionPolicy::Soft));

        let saved = repo
            .save_or_update(Patient::new("someName"))
            .await
            .expect("save should succeed after retries");
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.write_count(), 1);
        assert!(repo.find(&saved.id.to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn persistent_unavailability_is_surfaced() {
        let store = Arc::new(FlakyStore::failing(100));
        let repo = PatientRepository::new(store.clone(), test_cfg(DeletionPolicy::Soft));

        let err = repo.find(&Patient::new("x").id.to_string()).await.unwrap_err();
        assert!(matches!(err, PatientError::StoreUnavailable { attempts: 3, .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abandoned_save_still_completes() {
        let store = Arc::new(FlakyStore {
            put_delay: Duration::from_millis(50),
            ..FlakyStore::default()
        });
        let repo = PatientRepository::new(store.clone(), test_cfg(DeletionPolicy::Soft));
        let patient = Patient::new("someName");
        let id = patient.id.to_string();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), repo.save_or_update(patient)).await;
        assert!(abandoned.is_err(), "caller should have given up");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.inner.write_count(), 1);
        assert!(repo.find(&id).await.is_ok());
    }

    #[tokio::test]
    async fn file_store_backed_repository_round_trips() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cfg = Arc::new(CoreConfig::with_defaults(temp_dir.path().to_path_buf()).unwrap());
        let repo = PatientRepository::open(cfg.clone());

        let patient = repo.save_or_update(Patient::new("someName")).await.unwrap();
        let id = patient.id.to_string();
        repo.add_note(&id, patient.draft_note("some note")).await.unwrap();

        let reopened = PatientRepository::open(cfg.clone());
        let found = reopened.find(&id).await.expect("should find patient");
        assert_eq!(found.notes.len(), 1);
        assert_eq!(found.notes[0].text, "some note");
        assert!(patient.id.sharded_dir(&cfg.patients_dir()).is_dir());
        assert_eq!(reopened.find_all().await.unwrap(), vec![found]);
    }
}
