use std::sync::Arc;

use notes_core::{Note, NoteDraft};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};
use zbus::{interface, object_server::SignalEmitter};

use crate::service::NotesService;
use crate::sync::connectivity::Connectivity;
use crate::sync::engine::SyncOutcome;
use crate::sync::events::StatusScope;
use crate::sync::status::StatusBoard;
use crate::sync::store::StoreError;

pub const DBUS_NAME: &str = "org.offlinenotes.Sync1";
pub const DBUS_OBJECT_PATH: &str = "/org/offlinenotes/Sync1";
pub const DBUS_ERROR_NOT_FOUND: &str = "org.offlinenotes.Error.NotFound";
pub const DBUS_ERROR_FAILED: &str = "org.offlinenotes.Error.Failed";

// `(id, title, content, created_at, updated_at, synced)`, timestamps in
// RFC 3339.
pub type NoteTuple = (String, String, String, String, String, bool);

#[derive(Debug, Error)]
pub enum DbusServiceError {
    #[error("note does not exist")]
    NotFound,
    #[error("operation failed: {0}")]
    Failed(String),
}

impl From<StoreError> for DbusServiceError {
    fn from(err: StoreError) -> Self {
        DbusServiceError::Failed(err.to_string())
    }
}

pub fn dbus_error_name(err: &DbusServiceError) -> &'static str {
    match err {
        DbusServiceError::NotFound => DBUS_ERROR_NOT_FOUND,
        DbusServiceError::Failed(_) => DBUS_ERROR_FAILED,
    }
}

fn map_to_fdo(err: DbusServiceError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{}: {}", dbus_error_name(&err), err))
}

fn map_store_error(err: StoreError) -> zbus::fdo::Error {
    map_to_fdo(err.into())
}

fn rfc3339(at: OffsetDateTime) -> Result<String, DbusServiceError> {
    at.format(&Rfc3339)
        .map_err(|err| DbusServiceError::Failed(err.to_string()))
}

fn note_tuple(note: Note) -> Result<NoteTuple, DbusServiceError> {
    Ok((
        note.id,
        note.title,
        note.content,
        rfc3339(note.created_at)?,
        rfc3339(note.updated_at)?,
        note.synced,
    ))
}

fn outcome_str(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Offline => "offline".to_string(),
        SyncOutcome::AlreadyRunning => "already-running".to_string(),
        SyncOutcome::Completed(_) => "completed".to_string(),
        SyncOutcome::Failed(reason) => format!("failed: {reason}"),
        SyncOutcome::Rejected(reason) => format!("rejected: {reason}"),
    }
}

pub struct NotesDbusService {
    notes: Arc<NotesService>,
    board: Arc<StatusBoard>,
}

impl NotesDbusService {
    pub fn new(notes: Arc<NotesService>, board: Arc<StatusBoard>) -> Self {
        Self { notes, board }
    }
}

#[interface(name = "org.offlinenotes.Sync1")]
impl NotesDbusService {
    // An empty `id` creates a new note. Returns the id that was saved.
    async fn save_note(&self, id: &str, title: &str, content: &str) -> zbus::fdo::Result<String> {
        let mut draft = NoteDraft::new(title, content);
        if !id.is_empty() {
            draft = draft.with_id(id);
        }
        let written = self.notes.save_note(draft).await.map_err(map_store_error)?;
        debug!(id = %written.value.id, "dbus SaveNote");
        Ok(written.value.id)
    }

    async fn delete_note(&self, id: &str) -> zbus::fdo::Result<bool> {
        let written = self.notes.delete_note(id).await.map_err(map_store_error)?;
        debug!(id, removed = written.value, "dbus DeleteNote");
        Ok(written.value)
    }

    async fn list_notes(&self) -> zbus::fdo::Result<Vec<NoteTuple>> {
        let notes = self.notes.list_notes().await.map_err(map_store_error)?;
        notes
            .into_iter()
            .map(note_tuple)
            .collect::<Result<_, _>>()
            .map_err(map_to_fdo)
    }

    async fn get_note(&self, id: &str) -> zbus::fdo::Result<NoteTuple> {
        let note = self
            .notes
            .get_note(id)
            .await
            .map_err(map_store_error)?
            .ok_or(DbusServiceError::NotFound)
            .map_err(map_to_fdo)?;
        note_tuple(note).map_err(map_to_fdo)
    }

    async fn sync_now(&self) -> zbus::fdo::Result<String> {
        let outcome = self.notes.engine().sync_data().await;
        info!(outcome = %outcome_str(&outcome), "dbus SyncNow");
        Ok(outcome_str(&outcome))
    }

    async fn set_online(&self, online: bool) -> zbus::fdo::Result<()> {
        let engine = self.notes.engine();
        if engine.set_connectivity(Connectivity::from_online(online)) {
            engine.request_sync();
        }
        Ok(())
    }

    async fn queue_length(&self) -> zbus::fdo::Result<u64> {
        let len = self
            .notes
            .engine()
            .store()
            .queue_len()
            .await
            .map_err(map_store_error)?;
        Ok(u64::try_from(len).unwrap_or_default())
    }

    // `scope` is a note id or `global`. Idle scopes report `idle`.
    async fn get_sync_status(&self, scope: &str) -> zbus::fdo::Result<String> {
        Ok(self
            .board
            .status(&StatusScope::parse(scope))
            .map_or("idle", |status| status.as_str())
            .to_string())
    }

    async fn get_engine_state(&self) -> zbus::fdo::Result<String> {
        Ok(self.notes.engine().state().as_str().to_string())
    }

    #[zbus(signal)]
    pub async fn queue_changed(ctxt: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn sync_status_changed(
        ctxt: &SignalEmitter<'_>,
        scope: &str,
        status: &str,
    ) -> zbus::Result<()>;
}
