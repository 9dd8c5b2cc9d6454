use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use notes_core::{Note, NoteDraft, timestamp_now, truncate_to_micros};
use sqlx::{
    Executor, Row, Sqlite, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::events::EventBus;
use super::queue::{Mutation, MutationError, QueueEntry};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("queue entry error: {0}")]
    Mutation(#[from] MutationError),
    #[error("stored timestamp out of range: {0}")]
    Time(#[from] time::error::ComponentRange),
}

// Notes and the mutation queue share one database so a note write and its
// queue entry commit together. Timestamps are stored as unix microseconds.
pub struct NoteStore {
    pool: SqlitePool,
    events: Arc<EventBus>,
}

impl NoteStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            events: Arc::new(EventBus::new()),
        }
    }

    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    // every `sqlite::memory:` connection is its own database
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub async fn get_all(&self) -> Result<Vec<Note>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, title, content, created_at, updated_at, synced
             FROM notes
             ORDER BY updated_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(note_from_row).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<Note>, StoreError> {
        fetch_note(&self.pool, id).await
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM notes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    pub async fn save(&self, draft: NoteDraft) -> Result<Note, StoreError> {
        let NoteDraft {
            id,
            title,
            content,
            created_at,
            synced,
        } = draft;
        let id = id.filter(|id| !id.is_empty());

        let mut tx = self.pool.begin().await?;
        let previous = match id.as_deref() {
            Some(id) => fetch_note(&mut *tx, id).await?,
            None => None,
        };

        let now = timestamp_now();
        let created_at = created_at
            .map(truncate_to_micros)
            .or_else(|| previous.as_ref().map(|note| note.created_at))
            .unwrap_or(now);
        let note = Note {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            title,
            content,
            created_at,
            updated_at: now.max(created_at),
            synced: match &previous {
                Some(previous) => previous.synced && synced != Some(false),
                None => false,
            },
        };

        upsert_note(&mut *tx, &note).await?;
        let queued = !note.synced;
        if queued {
            let mutation = if previous.is_some() {
                Mutation::Update(note.clone())
            } else {
                Mutation::Create(note.clone())
            };
            insert_entry(&mut *tx, &mutation, now).await?;
        }
        tx.commit().await?;

        debug!(id = %note.id, synced = note.synced, "note saved");
        if queued {
            self.events.publish_queue_change();
        }
        Ok(note)
    }

    // Queues the delete even when no local row existed.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM notes WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        insert_entry(
            &mut *tx,
            &Mutation::Delete { id: id.to_string() },
            timestamp_now(),
        )
        .await?;
        tx.commit().await?;

        debug!(id, removed, "note deleted");
        self.events.publish_queue_change();
        Ok(removed)
    }

    // Returns `None` and leaves the row alone when the note has queued local
    // changes or the local copy is not strictly older. Check and write are one
    // statement, so a local save landing mid-merge is never overwritten.
    pub async fn apply_remote(&self, note: &Note) -> Result<Option<Note>, StoreError> {
        let mut stored = note.clone();
        stored.created_at = truncate_to_micros(stored.created_at);
        stored.updated_at = truncate_to_micros(stored.updated_at);
        stored.synced = true;

        let applied = sqlx::query(
            "INSERT INTO notes (id, title, content, created_at, updated_at, synced)
             SELECT ?1, ?2, ?3, ?4, ?5, 1
             WHERE NOT EXISTS (SELECT 1 FROM sync_queue WHERE note_id = ?1)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 content = excluded.content,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at,
                 synced = 1
             WHERE notes.updated_at < excluded.updated_at",
        )
        .bind(&stored.id)
        .bind(&stored.title)
        .bind(&stored.content)
        .bind(to_micros(stored.created_at))
        .bind(to_micros(stored.updated_at))
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if !applied {
            debug!(id = %stored.id, "remote copy not applied: local copy pending or newer");
            return Ok(None);
        }
        Ok(Some(stored))
    }

    pub async fn enqueue(&self, mutation: &Mutation) -> Result<i64, StoreError> {
        let queue_id = insert_entry(&self.pool, mutation, timestamp_now()).await?;
        self.events.publish_queue_change();
        Ok(queue_id)
    }

    pub async fn list_queue(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT queue_id, operation, payload, enqueued_at
             FROM sync_queue
             ORDER BY queue_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let operation: String = row.try_get("operation")?;
            let payload: String = row.try_get("payload")?;
            out.push(QueueEntry {
                queue_id: row.try_get("queue_id")?,
                mutation: Mutation::from_parts(&operation, &payload)?,
                enqueued_at: from_micros(row.try_get("enqueued_at")?)?,
            });
        }
        Ok(out)
    }

    pub async fn queue_len(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM sync_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    pub async fn clear_queue(&self) -> Result<u64, StoreError> {
        let removed = sqlx::query("DELETE FROM sync_queue")
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.events.publish_queue_change();
        Ok(removed)
    }

    // Entries after `through_queue_id` were queued during the pass and stay.
    pub async fn complete_drain(
        &self,
        through_queue_id: i64,
        note_ids: &[String],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM sync_queue WHERE queue_id <= ?1")
            .bind(through_queue_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        for id in note_ids {
            sqlx::query(
                "UPDATE notes SET synced = 1
                 WHERE id = ?1
                   AND NOT EXISTS (SELECT 1 FROM sync_queue WHERE note_id = ?1)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        if removed > 0 {
            self.events.publish_queue_change();
        }
        Ok(removed)
    }
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("offline-notes");
    path.push("notes.db");
    Ok(path)
}

async fn fetch_note<'e, E>(executor: E, id: &str) -> Result<Option<Note>, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, title, content, created_at, updated_at, synced FROM notes WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    row.as_ref().map(note_from_row).transpose()
}

async fn upsert_note<'e, E>(executor: E, note: &Note) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO notes (id, title, content, created_at, updated_at, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             content = excluded.content,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             synced = excluded.synced",
    )
    .bind(&note.id)
    .bind(&note.title)
    .bind(&note.content)
    .bind(to_micros(note.created_at))
    .bind(to_micros(note.updated_at))
    .bind(note.synced)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_entry<'e, E>(
    executor: E,
    mutation: &Mutation,
    enqueued_at: OffsetDateTime,
) -> Result<i64, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO sync_queue (operation, note_id, payload, enqueued_at)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(mutation.kind().as_str())
    .bind(mutation.note_id())
    .bind(mutation.payload_json()?)
    .bind(to_micros(enqueued_at))
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

fn note_from_row(row: &SqliteRow) -> Result<Note, StoreError> {
    Ok(Note {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created_at: from_micros(row.try_get("created_at")?)?,
        updated_at: from_micros(row.try_get("updated_at")?)?,
        synced: row.try_get("synced")?,
    })
}

// i64 microseconds span far more than the years `OffsetDateTime` can hold.
fn to_micros(at: OffsetDateTime) -> i64 {
    let micros = at.unix_timestamp_nanos() / 1_000;
    i64::try_from(micros).unwrap_or(if micros < 0 { i64::MIN } else { i64::MAX })
}

fn from_micros(micros: i64) -> Result<OffsetDateTime, StoreError> {
    Ok(OffsetDateTime::from_unix_timestamp_nanos(
        i128::from(micros) * 1_000,
    )?)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
