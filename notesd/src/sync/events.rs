//! In-process publish/subscribe for queue changes and sync status.
//!
//! Listeners are plain callbacks. Publishing takes a snapshot of the listener
//! set for the topic and invokes every listener in it synchronously; a listener
//! that panics is logged and skipped over, the rest still run.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{trace, warn};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct TopicMap<K, E> {
    next_id: u64,
    listeners: HashMap<K, Vec<(u64, Listener<E>)>>,
}

pub struct Topics<K, E> {
    inner: Arc<Mutex<TopicMap<K, E>>>,
}

impl<K, E> Default for Topics<K, E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TopicMap {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }
}

impl<K, E> Topics<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: 'static,
{
    pub fn subscribe<F>(&self, topic: K, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut map = lock(&self.inner);
            map.next_id += 1;
            let id = map.next_id;
            map.listeners
                .entry(topic.clone())
                .or_default()
                .push((id, Arc::new(listener)));
            id
        };

        let registry: Weak<Mutex<TopicMap<K, E>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut map = lock(&registry);
            if let Some(listeners) = map.listeners.get_mut(&topic) {
                listeners.retain(|(existing, _)| *existing != id);
                if listeners.is_empty() {
                    map.listeners.remove(&topic);
                }
            }
        })
    }

    /// Invokes every listener registered for `topic` at call time and returns
    /// how many ran to completion.
    pub fn publish(&self, topic: &K, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = lock(&self.inner)
            .listeners
            .get(topic)
            .map(|listeners| listeners.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(?topic, "event listener panicked"),
            }
        }
        delivered
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by `subscribe`. Dropping it keeps the listener registered.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Removes exactly the listener this handle was created for. Calling it
    /// again is a no-op.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusScope {
    Global,
    All,
    Note(String),
}

impl StatusScope {
    pub fn note(id: impl Into<String>) -> Self {
        StatusScope::Note(id.into())
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "global" => StatusScope::Global,
            "all" => StatusScope::All,
            id => StatusScope::Note(id.to_string()),
        }
    }
}

impl fmt::Display for StatusScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusScope::Global => f.write_str("global"),
            StatusScope::All => f.write_str("all"),
            StatusScope::Note(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    InProgress,
    Done,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::InProgress => "in-progress",
            SyncStatus::Done => "done",
            SyncStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub scope: StatusScope,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueChanged;

/// The two outward notification topics: `queue-change` and `sync-status`.
#[derive(Default)]
pub struct EventBus {
    queue: Topics<QueueChanged, QueueChanged>,
    status: Topics<StatusScope, StatusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Carries no payload: listeners re-read the queue.
    pub fn subscribe_queue_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.queue.subscribe(QueueChanged, move |_| listener())
    }

    pub fn publish_queue_change(&self) -> usize {
        trace!("queue-change");
        self.queue.publish(&QueueChanged, &QueueChanged)
    }

    pub fn subscribe_sync_status<F>(&self, scope: StatusScope, listener: F) -> Subscription
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.status.subscribe(scope, listener)
    }

    /// Delivers to listeners of `scope` and to the `all` wildcard.
    pub fn publish_sync_status(&self, scope: StatusScope, status: SyncStatus) -> usize {
        trace!(%scope, status = status.as_str(), "sync-status");
        let event = StatusEvent { scope, status };
        let mut delivered = self.status.publish(&event.scope, &event);
        if event.scope != StatusScope::All {
            delivered += self.status.publish(&StatusScope::All, &event);
        }
        delivered
    }
}
