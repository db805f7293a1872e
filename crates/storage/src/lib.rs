use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{MediaId, MessageId, ScheduleId},
    protocol::{MessagePreview, ScheduleRecord, SchedulePatch},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::debug;

mod memory;

pub use memory::MemoryStore;

const UNCONDITIONAL_WRITE_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("schedule {0} not found")]
    NotFound(ScheduleId),
    #[error("revision conflict on schedule {schedule_id}: expected {expected}, found {actual}")]
    Conflict {
        schedule_id: ScheduleId,
        expected: u64,
        actual: u64,
    },
    #[error("backing store unavailable: {0}")]
    Backend(String),
    #[error("malformed schedule record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Backend(value.to_string())
    }
}

/// Record store holding each schedule's embedded message and participant lists.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn get(&self, schedule_id: &ScheduleId) -> Result<ScheduleRecord, StoreError>;

    /// Applies `patch` and returns the new revision. Array fields overwrite
    /// the stored value whole.
    async fn update(&self, schedule_id: &ScheduleId, patch: SchedulePatch)
        -> Result<u64, StoreError>;
}

pub(crate) fn check_revision(
    schedule_id: &ScheduleId,
    current: u64,
    patch: &SchedulePatch,
) -> Result<(), StoreError> {
    match patch.expected_revision {
        Some(expected) if expected != current => Err(StoreError::Conflict {
            schedule_id: schedule_id.clone(),
            expected,
            actual: current,
        }),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub media_id: MediaId,
    pub schedule_id: ScheduleId,
    pub message_id: MessageId,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Each in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_schedule(
        &self,
        schedule_id: &ScheduleId,
        has_chat: bool,
    ) -> Result<ScheduleRecord, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO schedules (id, has_chat) VALUES (?, ?)")
            .bind(schedule_id.as_str())
            .bind(has_chat)
            .execute(&self.pool)
            .await?;
        self.get(schedule_id).await
    }

    pub async fn list_schedule_ids(&self) -> Result<Vec<ScheduleId>> {
        let rows = sqlx::query("SELECT id FROM schedules ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| ScheduleId(r.get::<String, _>(0)))
            .collect())
    }

    pub async fn store_media(
        &self,
        schedule_id: &ScheduleId,
        message_id: &MessageId,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<MediaId> {
        let media_id = MediaId::new(uuid::Uuid::new_v4().to_string());
        sqlx::query(
            "INSERT INTO media (id, schedule_id, message_id, file_name, mime_type, size_bytes, bytes) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(media_id.as_str())
        .bind(schedule_id.as_str())
        .bind(message_id.as_str())
        .bind(file_name)
        .bind(mime_type)
        .bind(i64::try_from(bytes.len()).unwrap_or(i64::MAX))
        .bind(bytes)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store media for schedule {schedule_id}"))?;
        Ok(media_id)
    }

    pub async fn load_media(&self, media_id: &MediaId) -> Result<Option<StoredMedia>> {
        let row = sqlx::query(
            "SELECT id, schedule_id, message_id, file_name, mime_type, bytes FROM media WHERE id = ?",
        )
        .bind(media_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredMedia {
            media_id: MediaId(r.get::<String, _>(0)),
            schedule_id: ScheduleId(r.get::<String, _>(1)),
            message_id: MessageId(r.get::<String, _>(2)),
            file_name: r.get::<String, _>(3),
            mime_type: r.get::<String, _>(4),
            bytes: r.get::<Vec<u8>, _>(5),
        }))
    }

    async fn load_record(&self, schedule_id: &ScheduleId) -> Result<ScheduleRecord, StoreError> {
        let row = sqlx::query(
            "SELECT has_chat, messages_json, participants_json, last_message_json, revision
             FROM schedules
             WHERE id = ?",
        )
        .bind(schedule_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => record_from_row(schedule_id, &row),
            None => Err(StoreError::NotFound(schedule_id.clone())),
        }
    }
}

fn record_from_row(schedule_id: &ScheduleId, row: &SqliteRow) -> Result<ScheduleRecord, StoreError> {
    let last_message = row
        .get::<Option<String>, _>(3)
        .map(|raw| serde_json::from_str::<MessagePreview>(&raw))
        .transpose()?;
    Ok(ScheduleRecord {
        id: schedule_id.clone(),
        has_chat: row.get::<bool, _>(0),
        messages: serde_json::from_str(&row.get::<String, _>(1))?,
        participants: serde_json::from_str(&row.get::<String, _>(2))?,
        last_message,
        revision: u64::try_from(row.get::<i64, _>(4)).unwrap_or_default(),
    })
}

#[async_trait]
impl BackingStore for Storage {
    async fn get(&self, schedule_id: &ScheduleId) -> Result<ScheduleRecord, StoreError> {
        self.load_record(schedule_id).await
    }

    async fn update(
        &self,
        schedule_id: &ScheduleId,
        patch: SchedulePatch,
    ) -> Result<u64, StoreError> {
        for _ in 0..UNCONDITIONAL_WRITE_ATTEMPTS {
            let mut record = self.load_record(schedule_id).await?;
            check_revision(schedule_id, record.revision, &patch)?;

            let read_revision = record.revision;
            record.apply(patch.clone());
            let next_revision = read_revision + 1;
            let last_message_json = record
                .last_message
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            let updated = sqlx::query(
                "UPDATE schedules
                 SET has_chat = ?, messages_json = ?, participants_json = ?, last_message_json = ?,
                     revision = ?, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ? AND revision = ?",
            )
            .bind(record.has_chat)
            .bind(serde_json::to_string(&record.messages)?)
            .bind(serde_json::to_string(&record.participants)?)
            .bind(last_message_json)
            .bind(i64::try_from(next_revision).unwrap_or(i64::MAX))
            .bind(schedule_id.as_str())
            .bind(i64::try_from(read_revision).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 1 {
                return Ok(next_revision);
            }
            debug!(
                schedule_id = %schedule_id,
                read_revision,
                "storage: schedule changed between read and write, re-reading"
            );
        }

        Err(StoreError::Backend(format!(
            "schedule {schedule_id} kept changing during update"
        )))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.contains(":memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
