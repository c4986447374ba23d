//! Document store abstraction.
//!
//! The repository never touches storage directly. It talks to a [`DocumentStore`]: a key/document
//! substrate where every document carries an opaque [`Revision`] and every write is conditional
//! on the revision the writer last saw. The revision check and the write happen as one atomic
//! step per document id, so concurrent same-patient writes end with one winner and one
//! revision mismatch.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryStore`] for tests and embedding,
//! - [`FileStore`], one JSON file per document in a sharded directory tree.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque revision token assigned by the store on every successful write.
///
/// Rendered as `<generation>-<digest>`: the generation counts writes to the document (starting
/// at 1) and the digest is derived from the stored body. Callers should only compare revisions
/// for equality; [`Revision::generation`] exists so that "the revision advanced" is checkable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Computes the revision that follows `previous` for a write of `body`.
    pub fn next(previous: Option<&Revision>, body: &[u8]) -> Self {
        let generation = previous.map_or(0, Revision::generation) + 1;
        let digest = hex::encode(Sha256::digest(body));
        Self(format!("{}-{}", generation, &digest[..32]))
    }

    /// Wraps a revision string received from outside the store.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Write counter encoded in the token, or 0 if the token is not in the expected form.
    pub fn generation(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(g, _)| g.parse().ok())
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as held by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub rev: Revision,
    pub body: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {id}")]
    NotFound { id: String },
    /// The expected revision did not match the stored one. `current` is `None` when the writer
    /// expected a document that no longer exists.
    #[error("revision mismatch for {id} (current: {current:?})")]
    RevMismatch {
        id: String,
        current: Option<Revision>,
    },
    #[error("invalid document id: {0}")]
    InvalidId(String),
    /// Transient failure; the operation may succeed if retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored document {id} is corrupt: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Only transient failures are eligible for automatic retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key/document persistence used by the repository.
///
/// Implementations must make `put` and `remove` atomic with respect to `get` for the same id:
/// a reader sees either the complete previous document or the complete new one.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Reads the current document and its revision.
    async fn get(&self, id: &str) -> StoreResult<StoredDocument>;

    /// Writes `body` under `id` if the stored revision equals `expected_rev`.
    ///
    /// `expected_rev == None` means "create": it fails with [`StoreError::RevMismatch`] if a
    /// document already exists. Returns the new revision.
    async fn put(
        &self,
        id: &str,
        body: serde_json::Value,
        expected_rev: Option<&Revision>,
    ) -> StoreResult<Revision>;

    /// Physically removes the document if the stored revision equals `expected_rev`.
    async fn remove(&self, id: &str, expected_rev: &Revision) -> StoreResult<()>;

    /// Returns every stored document. Order is unspecified.
    async fn list(&self) -> StoreResult<Vec<StoredDocument>>;
}

/// Shared revision check used by the bundled stores.
pub(crate) fn check_expected(
    id: &str,
    current: Option<&Revision>,
    expected: Option<&Revision>,
) -> StoreResult<()> {
    if current == expected {
        Ok(())
    } else {
        Err(StoreError::RevMismatch {
            id: id.to_string(),
            current: current.cloned(),
        })
    }
}
