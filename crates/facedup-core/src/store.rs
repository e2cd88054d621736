//! Seam to local persistence, plus an in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{FaceIndex, FaceToken, FacesetRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Key-value persistence for faceset records and the face index.
///
/// Each call is independently atomic; there are no multi-call transactions.
#[async_trait]
pub trait FaceStore: Send + Sync {
    async fn get_all_faceset_records(&self) -> Result<Vec<FacesetRecord>, StoreError>;

    async fn get_record(&self, id: &str) -> Result<Option<FacesetRecord>, StoreError>;

    /// Insert or replace the record with `record.id`.
    async fn upsert_record(&self, record: &FacesetRecord) -> Result<(), StoreError>;

    async fn get_face_index(&self) -> Result<FaceIndex, StoreError>;

    /// Record which faceset holds `token`. Append-only: an existing mapping is
    /// kept and the call is a no-op.
    async fn set_face_mapping(&self, token: &FaceToken, faceset_id: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, FacesetRecord>,
    index: FaceIndex,
}

/// Process-local store. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryFaceStore {
    state: Mutex<MemoryState>,
}

impl MemoryFaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = FacesetRecord>) -> Self {
        let mut state = MemoryState::default();
        for r in records {
            state.records.insert(r.id.clone(), r);
        }
        Self { state: Mutex::new(state) }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl FaceStore for MemoryFaceStore {
    async fn get_all_faceset_records(&self) -> Result<Vec<FacesetRecord>, StoreError> {
        let state = self.lock()?;
        let mut records: Vec<FacesetRecord> = state.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn get_record(&self, id: &str) -> Result<Option<FacesetRecord>, StoreError> {
        Ok(self.lock()?.records.get(id).cloned())
    }

    async fn upsert_record(&self, record: &FacesetRecord) -> Result<(), StoreError> {
        self.lock()?
            .records
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_face_index(&self) -> Result<FaceIndex, StoreError> {
        Ok(self.lock()?.index.clone())
    }

    async fn set_face_mapping(&self, token: &FaceToken, faceset_id: &str) -> Result<(), StoreError> {
        self.lock()?
            .index
            .entry(token.clone())
            .or_insert_with(|| faceset_id.to_string());
        Ok(())
    }
}
