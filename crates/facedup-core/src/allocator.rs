//! Faceset allocation: pick or create the remote faceset a new face joins,
//! and keep local bookkeeping in step with the remote service.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::service::FaceService;
use crate::store::FaceStore;
use crate::types::{FaceToken, FacesetRecord};

pub const MAX_FACESET_CAPACITY: u32 = 1000;
pub const DEFAULT_OUTER_ID_PREFIX: &str = "faceset";
pub const DEFAULT_FACESET_TAGS: &str = "face_verification";

/// Length of the random hex suffix on generated faceset ids.
const OUTER_ID_SUFFIX_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct AllocatorOptions {
    /// Maximum faces per faceset.
    pub capacity: u32,
    pub outer_id_prefix: String,
    /// Tags attached to newly created facesets.
    pub tags: String,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            capacity: MAX_FACESET_CAPACITY,
            outer_id_prefix: DEFAULT_OUTER_ID_PREFIX.to_string(),
            tags: DEFAULT_FACESET_TAGS.to_string(),
        }
    }
}

pub struct FacesetAllocator {
    service: Arc<dyn FaceService>,
    store: Arc<dyn FaceStore>,
    options: AllocatorOptions,
}

impl FacesetAllocator {
    pub fn new(
        service: Arc<dyn FaceService>,
        store: Arc<dyn FaceStore>,
        options: AllocatorOptions,
    ) -> Self {
        Self {
            service,
            store,
            options,
        }
    }

    pub fn options(&self) -> &AllocatorOptions {
        &self.options
    }

    /// Choose the faceset a new face should join.
    ///
    /// Walks local facesets with spare capacity from least to most full and
    /// returns the first one the remote service confirms has room. Candidates
    /// that are full remotely get their local count refreshed; candidates the
    /// service no longer knows are retired by recording them at capacity, so
    /// later calls skip them. Creates a new faceset when no candidate is usable.
    pub async fn find_or_create_target(&self) -> Result<String> {
        for candidate in self.candidates().await? {
            match self.service.faceset_detail(&candidate.id).await? {
                Some(detail) if detail.face_count < self.options.capacity => {
                    tracing::debug!(
                        faceset = %candidate.id,
                        local_count = candidate.count,
                        remote_count = detail.face_count,
                        "reusing faceset"
                    );
                    return Ok(candidate.id);
                }
                Some(detail) => {
                    tracing::warn!(
                        faceset = %candidate.id,
                        local_count = candidate.count,
                        remote_count = detail.face_count,
                        "faceset is full remotely; refreshing local count"
                    );
                    self.store
                        .upsert_record(&FacesetRecord {
                            count: detail.face_count,
                            ..candidate
                        })
                        .await?;
                }
                None => {
                    tracing::warn!(
                        faceset = %candidate.id,
                        "faceset recorded locally but missing remotely; retiring it"
                    );
                    self.store
                        .upsert_record(&FacesetRecord {
                            count: self.options.capacity,
                            ..candidate
                        })
                        .await?;
                }
            }
        }

        self.create_faceset().await
    }

    /// Add `face_token` to `faceset_id` remotely, then refresh local state.
    ///
    /// The local count is overwritten with the remote count rather than
    /// incremented. A failure after the remote add leaves the face in the
    /// remote faceset without a local index entry; nothing is rolled back.
    pub async fn commit_face(&self, face_token: &FaceToken, faceset_id: &str) -> Result<()> {
        let added = self.service.add_face(face_token, faceset_id).await?;
        if added == 0 {
            tracing::warn!(faceset = faceset_id, face_token = %face_token, "service reported no face added");
        }

        let detail = self
            .service
            .faceset_detail(faceset_id)
            .await?
            .ok_or_else(|| {
                Error::Inconsistent(format!("faceset {faceset_id} vanished after adding a face"))
            })?;

        let created_at = self
            .store
            .get_record(faceset_id)
            .await?
            .map(|r| r.created_at)
            .unwrap_or_else(Utc::now);

        self.store
            .upsert_record(&FacesetRecord {
                id: faceset_id.to_string(),
                count: detail.face_count,
                created_at,
            })
            .await?;
        self.store.set_face_mapping(face_token, faceset_id).await?;

        tracing::info!(
            faceset = faceset_id,
            face_token = %face_token,
            count = detail.face_count,
            "face committed"
        );
        Ok(())
    }

    /// Local facesets with spare capacity, least full first; store order on ties.
    async fn candidates(&self) -> Result<Vec<FacesetRecord>> {
        let mut records: Vec<FacesetRecord> = self
            .store
            .get_all_faceset_records()
            .await?
            .into_iter()
            .filter(|r| r.has_capacity(self.options.capacity))
            .collect();
        records.sort_by_key(|r| r.count);
        Ok(records)
    }

    async fn create_faceset(&self) -> Result<String> {
        let outer_id = new_outer_id(&self.options.outer_id_prefix);
        self.service
            .create_faceset(&outer_id, &outer_id, &self.options.tags)
            .await?;
        self.store.upsert_record(&FacesetRecord::new(&outer_id)).await?;

        tracing::info!(faceset = %outer_id, "created faceset");
        Ok(outer_id)
    }
}

/// `{prefix}_{8 hex chars}`, random per call.
fn new_outer_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &suffix[..OUTER_ID_SUFFIX_LEN])
}
