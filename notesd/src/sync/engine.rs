use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use notes_core::{DeleteOutcome, RemoteError, RemoteNotes};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::conflict::{changed_notes, resolve_conflicts};
use super::connectivity::Connectivity;
use super::events::{EventBus, StatusScope, SyncStatus};
use super::queue::{Mutation, QueueEntry};
use super::store::{NoteStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("queue entry {queue_id} for note {note_id} failed: {source}")]
    Drain {
        queue_id: i64,
        note_id: String,
        #[source]
        source: RemoteError,
    },
}

impl EngineError {
    // Store errors are usually a busy or briefly unavailable database.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(_) => true,
            EngineError::Remote(source) | EngineError::Drain { source, .. } => {
                source.is_retryable()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Offline,
    OnlineIdle,
    Syncing,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Offline => "offline",
            EngineState::OnlineIdle => "online",
            EngineState::Syncing => "syncing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassSummary {
    pub drained: usize,
    pub pulled: usize,
    pub merged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Offline,
    AlreadyRunning,
    Completed(PassSummary),
    // worth retrying soon: network trouble, 5xx, rate limiting
    Failed(String),
    // the remote refused a change; retrying the same queue will not help
    Rejected(String),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }
}

struct PassGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    store: Arc<NoteStore>,
    remote: Arc<dyn RemoteNotes>,
    events: Arc<EventBus>,
    online: AtomicBool,
    syncing: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: Arc<NoteStore>, remote: Arc<dyn RemoteNotes>, initial: Connectivity) -> Self {
        let events = Arc::clone(store.events());
        Self {
            store,
            remote,
            events,
            online: AtomicBool::new(initial.is_online()),
            syncing: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<NoteStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EngineState {
        if !self.is_online() {
            EngineState::Offline
        } else if self.is_syncing() {
            EngineState::Syncing
        } else {
            EngineState::OnlineIdle
        }
    }

    // true on an offline to online transition
    pub fn set_connectivity(&self, connectivity: Connectivity) -> bool {
        let online = connectivity.is_online();
        let was_online = self.online.swap(online, Ordering::AcqRel);
        if was_online != online {
            info!(state = ?connectivity, "connectivity updated");
        }
        online && !was_online
    }

    pub async fn handle_online(&self) -> SyncOutcome {
        self.set_connectivity(Connectivity::Online);
        self.sync_data().await
    }

    pub fn handle_offline(&self) {
        self.set_connectivity(Connectivity::Offline);
    }

    pub fn request_sync(self: &Arc<Self>) -> JoinHandle<SyncOutcome> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.sync_data().await })
    }

    pub async fn sync_data(&self) -> SyncOutcome {
        if !self.is_online() {
            debug!("sync skipped: offline");
            return SyncOutcome::Offline;
        }
        let Some(_guard) = PassGuard::acquire(&self.syncing) else {
            debug!("sync skipped: pass already running");
            return SyncOutcome::AlreadyRunning;
        };

        self.events
            .publish_sync_status(StatusScope::Global, SyncStatus::InProgress);
        match self.run_pass().await {
            Ok(summary) => {
                info!(
                    drained = summary.drained,
                    pulled = summary.pulled,
                    merged = summary.merged,
                    "sync pass complete"
                );
                self.events
                    .publish_sync_status(StatusScope::Global, SyncStatus::Done);
                SyncOutcome::Completed(summary)
            }
            Err(err) => {
                self.events
                    .publish_sync_status(StatusScope::Global, SyncStatus::Error);
                if err.is_retryable() {
                    warn!(error = %err, "sync pass failed");
                    SyncOutcome::Failed(err.to_string())
                } else {
                    error!(error = %err, "sync pass rejected by remote");
                    SyncOutcome::Rejected(err.to_string())
                }
            }
        }
    }

    async fn run_pass(&self) -> Result<PassSummary, EngineError> {
        let snapshot = self.store.list_queue().await?;
        let drained = self.drain(&snapshot).await?;
        let (pulled, merged) = self.pull_and_merge().await?;
        Ok(PassSummary {
            drained,
            pulled,
            merged,
        })
    }

    // Stops at the first failure; entries are only removed once all went through.
    async fn drain(&self, snapshot: &[QueueEntry]) -> Result<usize, EngineError> {
        let Some(last) = snapshot.last() else {
            return Ok(0);
        };

        let mut drained_ids: Vec<String> = Vec::new();
        for entry in snapshot {
            let note_id = entry.mutation.note_id().to_string();
            let scope = StatusScope::note(note_id.clone());
            self.events
                .publish_sync_status(scope.clone(), SyncStatus::InProgress);

            if let Err(source) = self.dispatch(&entry.mutation).await {
                self.events.publish_sync_status(scope, SyncStatus::Error);
                return Err(EngineError::Drain {
                    queue_id: entry.queue_id,
                    note_id,
                    source,
                });
            }

            self.events.publish_sync_status(scope, SyncStatus::Done);
            if !drained_ids.contains(&note_id) {
                drained_ids.push(note_id);
            }
        }

        self.store
            .complete_drain(last.queue_id, &drained_ids)
            .await?;
        Ok(snapshot.len())
    }

    async fn dispatch(&self, mutation: &Mutation) -> Result<(), RemoteError> {
        match mutation {
            Mutation::Create(note) => {
                self.remote.create(note).await?;
            }
            Mutation::Update(note) => {
                self.remote.update(&note.id, note).await?;
            }
            Mutation::Delete { id } => {
                if self.remote.delete(id).await? == DeleteOutcome::AlreadyGone {
                    debug!(id = %id, "remote delete: note already gone");
                }
            }
        }
        Ok(())
    }

    // `local` may be stale by the time a note is written; apply_remote
    // re-checks against the row and the queue.
    async fn pull_and_merge(&self) -> Result<(usize, usize), EngineError> {
        let listing = self.remote.list().await?;
        let pulled = listing.len();

        let local = self.store.get_all().await?;
        let mut merged = 0;
        for note in changed_notes(&local, resolve_conflicts(&local, &listing)) {
            if self.store.apply_remote(&note).await?.is_some() {
                merged += 1;
            }
        }
        Ok((pulled, merged))
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
