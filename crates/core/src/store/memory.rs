use super::{check_expected, DocumentStore, Revision, StoreError, StoreResult, StoredDocument};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Process-local document store.
///
/// The revision check and the write happen under one write lock, so concurrent writers to the
/// same id serialise and readers never observe a half-applied write.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, StoredDocument>>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutations (`put` and `remove`) since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, id: &str) -> StoreResult<StoredDocument> {
        self.docs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn put(
        &self,
        id: &str,
        body: serde_json::Value,
        expected_rev: Option<&Revision>,
    ) -> StoreResult<Revision> {
        let bytes = serde_json::to_vec(&body).map_err(|source| StoreError::Corrupt {
            id: id.to_string(),
            source,
        })?;

        let mut docs = self.docs.write().await;
        let current = docs.get(id).map(|d| &d.rev);
        check_expected(id, current, expected_rev)?;

        let rev = Revision::next(current, &bytes);
        docs.insert(
            id.to_string(),
            StoredDocument {
                id: id.to_string(),
                rev: rev.clone(),
                body,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(rev)
    }

    async fn remove(&self, id: &str, expected_rev: &Revision) -> StoreResult<()> {
        let mut docs = self.docs.write().await;
        let Some(current) = docs.get(id) else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        check_expected(id, Some(&current.rev), Some(expected_rev))?;

        docs.remove(id);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<StoredDocument>> {
        Ok(self.docs.read().await.values().cloned().collect())
    }
}
