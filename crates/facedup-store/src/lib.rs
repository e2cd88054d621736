//! facedup-store: SQLite-backed [`FaceStore`].
//!
//! Two tables: `facesets` holds one row per remote faceset with its last known
//! face count, `face_index` maps each stored face token to its faceset. Every
//! trait call is a single statement, so each is atomic on its own.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use facedup_core::{FaceIndex, FaceStore, FaceToken, FacesetRecord, StoreError};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS facesets (
    id         TEXT PRIMARY KEY,
    count      INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS face_index (
    face_token TEXT PRIMARY KEY,
    faceset_id TEXT NOT NULL
);
";

/// Raw `facesets` row before validation.
type RecordRow = (String, i64, String);

pub struct SqliteFaceStore {
    conn: Connection,
}

impl SqliteFaceStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).await.map_err(backend)?;
        let store = Self::init(conn).await?;
        tracing::info!(path = %path.display(), "opened face store");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(backend)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await
        .map_err(backend)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl FaceStore for SqliteFaceStore {
    async fn get_all_faceset_records(&self) -> Result<Vec<FacesetRecord>, StoreError> {
        let rows: Vec<RecordRow> = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, count, created_at FROM facesets ORDER BY created_at, id")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(backend)?;

        rows.into_iter().map(decode_record).collect()
    }

    async fn get_record(&self, id: &str) -> Result<Option<FacesetRecord>, StoreError> {
        let id = id.to_string();
        let row: Option<RecordRow> = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, count, created_at FROM facesets WHERE id = ?1",
                        params![id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(backend)?;

        row.map(decode_record).transpose()
    }

    async fn upsert_record(&self, record: &FacesetRecord) -> Result<(), StoreError> {
        let id = record.id.clone();
        let count = i64::from(record.count);
        let created_at = record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO facesets (id, count, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET count = excluded.count, created_at = excluded.created_at",
                    params![id, count, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(backend)
    }

    async fn get_face_index(&self) -> Result<FaceIndex, StoreError> {
        let rows: Vec<(String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT face_token, faceset_id FROM face_index")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|(token, faceset)| (FaceToken::new(token), faceset))
            .collect())
    }

    async fn set_face_mapping(&self, token: &FaceToken, faceset_id: &str) -> Result<(), StoreError> {
        let token = token.as_str().to_string();
        let faceset_id = faceset_id.to_string();

        let inserted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "INSERT INTO face_index (face_token, faceset_id) VALUES (?1, ?2)
                     ON CONFLICT(face_token) DO NOTHING",
                    params![token, faceset_id],
                )?;
                Ok(n)
            })
            .await
            .map_err(backend)?;

        if inserted == 0 {
            tracing::debug!("face token already indexed; mapping unchanged");
        }
        Ok(())
    }
}

fn decode_record((id, count, created_at): RecordRow) -> Result<FacesetRecord, StoreError> {
    let count = u32::try_from(count)
        .map_err(|_| StoreError::Corrupt(format!("faceset {id}: count {count} out of range")))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Corrupt(format!("faceset {id}: created_at {created_at:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(FacesetRecord {
        id,
        count,
        created_at,
    })
}

fn backend(err: tokio_rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
