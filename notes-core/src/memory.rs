use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::note::{Note, timestamp_now};
use crate::remote::{DeleteOutcome, RemoteError, RemoteNotes};

/// One call observed by [`MemoryRemote`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    List,
    Create(String),
    Update(String),
    Delete(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    notes: Vec<Note>,
    next_id: u64,
    fail_next: u32,
    offline: bool,
    calls: Vec<RemoteCall>,
}

/// In-process stand-in for the notes service.
///
/// Stamps `updated_at` on every write the way a real server would, keeps
/// client-supplied ids, and can be told to fail or go offline.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    latency: Duration,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn seed(&self, notes: impl IntoIterator<Item = Note>) {
        let mut state = self.lock();
        for note in notes {
            upsert(&mut state.notes, note);
        }
    }

    pub fn notes(&self) -> Vec<Note> {
        self.lock().notes.clone()
    }

    pub fn get(&self, id: &str) -> Option<Note> {
        self.lock().notes.iter().find(|note| note.id == id).cloned()
    }

    /// Edits a note server-side, as another client would.
    pub fn touch(&self, id: &str, content: &str) -> Option<Note> {
        let mut state = self.lock();
        let note = state.notes.iter_mut().find(|note| note.id == id)?;
        note.content = content.to_string();
        note.updated_at = timestamp_now();
        Some(note.clone())
    }

    /// The next `count` calls fail with [`RemoteError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, call: RemoteCall) -> Result<MutexGuard<'_, MemoryState>, RemoteError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut state = self.lock();
        state.calls.push(call);
        if state.offline {
            return Err(RemoteError::Unavailable("network error".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(RemoteError::Unavailable("injected failure".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteNotes for MemoryRemote {
    async fn list(&self) -> Result<Vec<Note>, RemoteError> {
        let state = self.enter(RemoteCall::List).await?;
        Ok(state.notes.clone())
    }

    async fn create(&self, note: &Note) -> Result<Note, RemoteError> {
        let mut state = self.enter(RemoteCall::Create(note.id.clone())).await?;
        let now = timestamp_now();
        let mut created = note.clone();
        if created.id.is_empty() {
            state.next_id += 1;
            created.id = state.next_id.to_string();
        }
        created.created_at = now;
        created.updated_at = now;
        created.synced = true;
        upsert(&mut state.notes, created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, note: &Note) -> Result<Note, RemoteError> {
        let mut state = self.enter(RemoteCall::Update(id.to_string())).await?;
        let existing = state
            .notes
            .iter_mut()
            .find(|candidate| candidate.id == id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        existing.title = note.title.clone();
        existing.content = note.content.clone();
        existing.updated_at = timestamp_now();
        existing.synced = true;
        Ok(existing.clone())
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, RemoteError> {
        let mut state = self.enter(RemoteCall::Delete(id.to_string())).await?;
        let before = state.notes.len();
        state.notes.retain(|note| note.id != id);
        if state.notes.len() == before {
            Ok(DeleteOutcome::AlreadyGone)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }
}

fn upsert(notes: &mut Vec<Note>, note: Note) {
    match notes.iter_mut().find(|existing| existing.id == note.id) {
        Some(existing) => *existing = note,
        None => notes.push(note),
    }
}
