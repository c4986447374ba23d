//! File-backed document store.
//!
//! ## Storage layout
//!
//! ```text
//! <root>/
//!   <s1>/
//!     <s2>/
//!       <id>/
//!         patient.json    # { "id", "rev", "body" }
//!         patient.lock    # held while a writer checks and replaces patient.json
//! ```
//!
//! where `s1` and `s2` are the first four hex characters of the canonical record id.
//!
//! A writer takes an exclusive OS lock on `patient.lock`, re-reads the stored revision, writes a
//! temporary file with a name unique to that writer and renames it over `patient.json`. The lock
//! is a file lock rather than an in-process mutex, so writers in other processes and other
//! `FileStore` instances on the same root serialise at the same revision check. Readers take no
//! lock; rename is atomic on one filesystem, so they see either the old envelope or the new one.
//!
//! A hard-removed document leaves its directory and lock file behind.

use super::{check_expected, DocumentStore, Revision, StoreError, StoreResult, StoredDocument};
use crate::constants::{PATIENT_DOC_FILENAME, PATIENT_DOC_LOCK_FILENAME, PATIENT_DOC_TMP_PREFIX};
use async_trait::async_trait;
use fs2::FileExt;
use pdr_uuid::{RecordId, Uuid};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

/// Exclusive hold on a document's lock file, released when the handle is closed.
struct DocumentLock {
    _file: File,
}

impl FileStore {
    /// Creates a store rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the envelope file for `id`.
    pub fn document_path(&self, id: &RecordId) -> PathBuf {
        id.sharded_dir(&self.root).join(PATIENT_DOC_FILENAME)
    }

    async fn lock_document(&self, dir: &Path) -> StoreResult<DocumentLock> {
        tokio::fs::create_dir_all(dir).await.map_err(io_error)?;

        let lock_path = dir.join(PATIENT_DOC_LOCK_FILENAME);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(ErrorKind::Other, e)))?
        .map_err(io_error)?;

        Ok(DocumentLock { _file: file })
    }

    async fn read_envelope(&self, id: &str, path: &Path) -> StoreResult<Option<StoredDocument>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                id: id.to_string(),
                source,
            })
    }

    /// Replaces the envelope in `dir`. The caller must hold the document lock.
    async fn write_envelope(&self, dir: &Path, doc: &StoredDocument) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|source| StoreError::Corrupt {
            id: doc.id.clone(),
            source,
        })?;

        let tmp_path = dir.join(format!(
            "{}.{}",
            PATIENT_DOC_TMP_PREFIX,
            Uuid::new_v4().simple()
        ));
        let result = replace_file(&tmp_path, &dir.join(PATIENT_DOC_FILENAME), &bytes).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result
    }
}

async fn replace_file(tmp_path: &Path, path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut file = tokio::fs::File::create(tmp_path).await.map_err(io_error)?;
    file.write_all(bytes).await.map_err(io_error)?;
    file.sync_all().await.map_err(io_error)?;
    drop(file);

    tokio::fs::rename(tmp_path, path).await.map_err(io_error)
}

/// Timeouts and interruptions are worth retrying; everything else is reported as-is.
fn io_error(e: std::io::Error) -> StoreError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Io(e),
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, id: &str) -> StoreResult<StoredDocument> {
        // A non-canonical id can never have been stored.
        let Ok(record_id) = RecordId::parse(id) else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };

        self.read_envelope(id, &self.document_path(&record_id))
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn put(
        &self,
        id: &str,
        body: serde_json::Value,
        expected_rev: Option<&Revision>,
    ) -> StoreResult<Revision> {
        let record_id = RecordId::parse(id).map_err(|e| StoreError::InvalidId(e.to_string()))?;
        let dir = record_id.sharded_dir(&self.root);
        let path = dir.join(PATIENT_DOC_FILENAME);

        let _lock = self.lock_document(&dir).await?;

        let current = self.read_envelope(id, &path).await?.map(|d| d.rev);
        check_expected(id, current.as_ref(), expected_rev)?;

        let body_bytes = serde_json::to_vec(&body).map_err(|source| StoreError::Corrupt {
            id: id.to_string(),
            source,
        })?;
        let rev = Revision::next(current.as_ref(), &body_bytes);

        let doc = StoredDocument {
            id: id.to_string(),
            rev: rev.clone(),
            body,
        };
        self.write_envelope(&dir, &doc).await?;

        Ok(rev)
    }

    async fn remove(&self, id: &str, expected_rev: &Revision) -> StoreResult<()> {
        let Ok(record_id) = RecordId::parse(id) else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        let dir = record_id.sharded_dir(&self.root);
        let path = dir.join(PATIENT_DOC_FILENAME);

        if self.read_envelope(id, &path).await?.is_none() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }

        let _lock = self.lock_document(&dir).await?;

        let Some(current) = self.read_envelope(id, &path).await? else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        check_expected(id, Some(&current.rev), Some(expected_rev))?;

        tokio::fs::remove_file(&path).await.map_err(io_error)
    }

    async fn list(&self) -> StoreResult<Vec<StoredDocument>> {
        let mut docs = Vec::new();

        let mut s1_iter = match tokio::fs::read_dir(&self.root).await {
            Ok(it) => it,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(docs),
            Err(e) => return Err(io_error(e)),
        };

        while let Some(s1) = s1_iter.next_entry().await.map_err(io_error)? {
            if !s1.file_type().await.map_err(io_error)?.is_dir() {
                continue;
            }
            let mut s2_iter = tokio::fs::read_dir(s1.path()).await.map_err(io_error)?;

            while let Some(s2) = s2_iter.next_entry().await.map_err(io_error)? {
                if !s2.file_type().await.map_err(io_error)?.is_dir() {
                    continue;
                }
                let mut id_iter = tokio::fs::read_dir(s2.path()).await.map_err(io_error)?;

                while let Some(id_ent) = id_iter.next_entry().await.map_err(io_error)? {
                    let Some(id) = id_ent.file_name().to_str().map(str::to_owned) else {
                        continue;
                    };
                    if !RecordId::is_canonical(&id) {
                        continue;
                    }

                    match self
                        .read_envelope(&id, &id_ent.path().join(PATIENT_DOC_FILENAME))
                        .await
                    {
                        Ok(Some(doc)) => docs.push(doc),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("skipping unreadable document {}: {}", id, e);
                        }
                    }
                }
            }
        }

        Ok(docs)
    }
}
