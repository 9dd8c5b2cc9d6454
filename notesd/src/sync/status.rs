//! Latest sync status per scope, as a UI would display it.
//!
//! `done` and `error` are transient: they drop back to idle after a short
//! delay unless a newer status for the same scope arrived in between.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

use super::events::{EventBus, StatusEvent, StatusScope, Subscription, SyncStatus};

pub const DONE_VISIBLE_FOR: Duration = Duration::from_millis(1800);
pub const ERROR_VISIBLE_FOR: Duration = Duration::from_millis(3000);

#[derive(Debug, Default)]
struct BoardState {
    entries: HashMap<StatusScope, (SyncStatus, u64)>,
    generation: u64,
}

pub struct StatusBoard {
    state: Arc<Mutex<BoardState>>,
    subscription: Mutex<Subscription>,
}

impl StatusBoard {
    pub fn attach(events: &EventBus) -> Self {
        let state = Arc::new(Mutex::new(BoardState::default()));
        let sink = Arc::clone(&state);
        let subscription =
            events.subscribe_sync_status(StatusScope::All, move |event| record(&sink, event));
        Self {
            state,
            subscription: Mutex::new(subscription),
        }
    }

    // `None` means idle.
    pub fn status(&self, scope: &StatusScope) -> Option<SyncStatus> {
        lock(&self.state)
            .entries
            .get(scope)
            .map(|(status, _)| *status)
    }

    pub fn snapshot(&self) -> Vec<(StatusScope, SyncStatus)> {
        lock(&self.state)
            .entries
            .iter()
            .map(|(scope, (status, _))| (scope.clone(), *status))
            .collect()
    }

    pub fn detach(&self) {
        lock(&self.subscription).unsubscribe();
    }
}

fn record(state: &Arc<Mutex<BoardState>>, event: &StatusEvent) {
    let generation = {
        let mut board = lock(state);
        board.generation += 1;
        let generation = board.generation;
        board
            .entries
            .insert(event.scope.clone(), (event.status, generation));
        generation
    };

    let visible_for = match event.status {
        SyncStatus::InProgress => return,
        SyncStatus::Done => DONE_VISIBLE_FOR,
        SyncStatus::Error => ERROR_VISIBLE_FOR,
    };
    let Ok(runtime) = Handle::try_current() else {
        debug!(scope = %event.scope, "no runtime, status will not clear");
        return;
    };
    let state = Arc::clone(state);
    let scope = event.scope.clone();
    runtime.spawn(async move {
        tokio::time::sleep(visible_for).await;
        let mut board = lock(&state);
        if board
            .entries
            .get(&scope)
            .is_some_and(|(_, current)| *current == generation)
        {
            board.entries.remove(&scope);
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn done_clears_after_delay() {
        let bus = EventBus::new();
        let board = StatusBoard::attach(&bus);
        let scope = StatusScope::note("n1");

        bus.publish_sync_status(scope.clone(), SyncStatus::Done);
        assert_eq!(board.status(&scope), Some(SyncStatus::Done));

        advance(1700).await;
        assert_eq!(board.status(&scope), Some(SyncStatus::Done));
        advance(200).await;
        assert_eq!(board.status(&scope), None);
    }

    #[tokio::test(start_paused = true)]
    async fn error_lingers_longer_than_done() {
        let bus = EventBus::new();
        let board = StatusBoard::attach(&bus);

        bus.publish_sync_status(StatusScope::Global, SyncStatus::Error);
        advance(2000).await;
        assert_eq!(board.status(&StatusScope::Global), Some(SyncStatus::Error));
        advance(1100).await;
        assert_eq!(board.status(&StatusScope::Global), None);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_status_is_not_cleared_by_old_timer() {
        let bus = EventBus::new();
        let board = StatusBoard::attach(&bus);

        bus.publish_sync_status(StatusScope::Global, SyncStatus::Done);
        advance(1000).await;
        bus.publish_sync_status(StatusScope::Global, SyncStatus::InProgress);
        advance(2000).await;

        assert_eq!(
            board.status(&StatusScope::Global),
            Some(SyncStatus::InProgress)
        );
    }

    #[tokio::test]
    async fn detach_stops_recording() {
        let bus = EventBus::new();
        let board = StatusBoard::attach(&bus);
        board.detach();

        bus.publish_sync_status(StatusScope::Global, SyncStatus::InProgress);
        assert!(board.snapshot().is_empty());
    }

    #[test]
    fn records_without_a_runtime() {
        let bus = EventBus::new();
        let board = StatusBoard::attach(&bus);
        bus.publish_sync_status(StatusScope::note("n1"), SyncStatus::Done);
        assert_eq!(
            board.snapshot(),
            vec![(StatusScope::note("n1"), SyncStatus::Done)]
        );
    }
}
