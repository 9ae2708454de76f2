use async_trait::async_trait;
use exam_core::model::{ExamKey, ExamSessionRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable Local Store: one whole record per exam part.
///
/// Writes replace the full record; callers read, modify, then `put`. The store
/// is a local safety net, not the authority: on resume the remote session wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the record for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read or the stored
    /// record cannot be decoded.
    async fn get(&self, key: &ExamKey) -> Result<Option<ExamSessionRecord>, StorageError>;

    /// Replace the record for `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn put(&self, key: &ExamKey, record: &ExamSessionRecord) -> Result<(), StorageError>;

    /// Remove the record for `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn delete(&self, key: &ExamKey) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn exists(&self, key: &ExamKey) -> Result<bool, StorageError>;
}

/// Simple in-memory store for testing and prototyping.
///
/// Clones share the same map, so a test can keep a handle while the runtime
/// owns another.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    records: Arc<Mutex<HashMap<ExamKey, ExamSessionRecord>>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &ExamKey) -> Result<Option<ExamSessionRecord>, StorageError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn put(&self, key: &ExamKey, record: &ExamSessionRecord) -> Result<(), StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &ExamKey) -> Result<(), StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &ExamKey) -> Result<bool, StorageError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.contains_key(key))
    }
}

/// Store handle behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub sessions: Arc<dyn SessionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        Self { sessions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{Answer, QuestionId};
    use exam_core::time::fixed_now;

    #[tokio::test]
    async fn put_replaces_whole_record() {
        let store = InMemorySessionStore::new();
        let key = ExamKey::new("exam_1");
        assert!(!store.exists(&key).await.unwrap());

        let mut record = ExamSessionRecord::new(fixed_now());
        record.set_answer(QuestionId::new(1), Answer::Choice("a".into()));
        store.put(&key, &record).await.unwrap();

        let fresh = ExamSessionRecord::new(fixed_now());
        store.put(&key, &fresh).await.unwrap();

        let fetched = store.get(&key).await.unwrap().unwrap();
        assert!(fetched.answers().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = Storage::in_memory();
        let key = ExamKey::new("exam_2");
        store
            .sessions
            .put(&key, &ExamSessionRecord::new(fixed_now()))
            .await
            .unwrap();

        store.sessions.delete(&key).await.unwrap();
        store.sessions.delete(&key).await.unwrap();
        assert!(!store.sessions.exists(&key).await.unwrap());
        assert!(store.sessions.get(&key).await.unwrap().is_none());
    }
}
