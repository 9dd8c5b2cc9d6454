use std::sync::Arc;

use notes_core::{Note, NoteDraft};
use tokio::task::JoinHandle;

use crate::sync::engine::{SyncEngine, SyncOutcome};
use crate::sync::store::{NoteStore, StoreError};

// Result of a user-facing write, with the pass it triggered when online.
#[derive(Debug)]
pub struct Written<T> {
    pub value: T,
    pub sync: Option<JoinHandle<SyncOutcome>>,
}

// What an editor talks to: writes always go through the queue and
// kick off a pass right away if the remote is reachable.
pub struct NotesService {
    engine: Arc<SyncEngine>,
}

impl NotesService {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    fn store(&self) -> &NoteStore {
        self.engine.store()
    }

    pub async fn list_notes(&self) -> Result<Vec<Note>, StoreError> {
        self.store().get_all().await
    }

    pub async fn get_note(&self, id: &str) -> Result<Option<Note>, StoreError> {
        self.store().get(id).await
    }

    pub async fn save_note(&self, draft: NoteDraft) -> Result<Written<Note>, StoreError> {
        let note = self.store().save(draft.dirty()).await?;
        Ok(Written {
            value: note,
            sync: self.kick(),
        })
    }

    pub async fn delete_note(&self, id: &str) -> Result<Written<bool>, StoreError> {
        let removed = self.store().delete(id).await?;
        Ok(Written {
            value: removed,
            sync: self.kick(),
        })
    }

    fn kick(&self) -> Option<JoinHandle<SyncOutcome>> {
        self.engine
            .is_online()
            .then(|| self.engine.request_sync())
    }
}
