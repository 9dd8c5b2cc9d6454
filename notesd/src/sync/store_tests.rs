use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

use crate::sync::queue::MutationKind;

async fn make_store() -> NoteStore {
    NoteStore::open_in_memory().await.unwrap()
}

fn at(seconds: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds)
}

fn remote_note(id: &str, updated: i64) -> Note {
    Note {
        id: id.to_string(),
        title: format!("title {id}"),
        content: "remote".to_string(),
        created_at: at(0),
        updated_at: at(updated),
        synced: true,
    }
}

fn count_queue_changes(store: &NoteStore) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    let _subscription = store.events().subscribe_queue_change(move || {
        handle.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test]
async fn save_without_id_creates_note_and_queues_create() {
    let store = make_store().await;

    let note = store.save(NoteDraft::new("Groceries", "milk")).await.unwrap();

    assert!(Uuid::parse_str(&note.id).is_ok());
    assert!(!note.synced);
    assert!(note.updated_at >= note.created_at);
    assert_eq!(store.get(&note.id).await.unwrap(), Some(note.clone()));

    let queue = store.list_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].operation(), MutationKind::CreateNote);
    assert_eq!(queue[0].mutation, Mutation::Create(note));
}

#[tokio::test]
async fn empty_id_is_treated_as_missing() {
    let store = make_store().await;
    let note = store
        .save(NoteDraft::new("A", "x").with_id(""))
        .await
        .unwrap();
    assert!(!note.id.is_empty());
}

#[tokio::test]
async fn save_with_unknown_id_is_a_create() {
    let store = make_store().await;
    let note = store
        .save(NoteDraft::new("A", "x").with_id("client-id"))
        .await
        .unwrap();

    assert_eq!(note.id, "client-id");
    let queue = store.list_queue().await.unwrap();
    assert_eq!(queue[0].operation(), MutationKind::CreateNote);
}

#[tokio::test]
async fn save_existing_keeps_created_at_and_queues_update() {
    let store = make_store().await;
    let first = store.save(NoteDraft::new("A", "x")).await.unwrap();

    let second = store
        .save(NoteDraft::new("A", "y").with_id(first.id.clone()))
        .await
        .unwrap();

    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.content, "y");

    let kinds: Vec<_> = store
        .list_queue()
        .await
        .unwrap()
        .iter()
        .map(QueueEntry::operation)
        .collect();
    assert_eq!(kinds, vec![MutationKind::CreateNote, MutationKind::UpdateNote]);
}

#[tokio::test]
async fn synced_note_stays_synced_unless_marked_dirty() {
    let store = make_store().await;
    store.apply_remote(&remote_note("n1", 10)).await.unwrap();

    let untouched = store
        .save(NoteDraft::new("A", "x").with_id("n1"))
        .await
        .unwrap();
    assert!(untouched.synced);
    assert_eq!(store.queue_len().await.unwrap(), 0);

    let dirty = store
        .save(NoteDraft::new("A", "y").with_id("n1").dirty())
        .await
        .unwrap();
    assert!(!dirty.synced);
    assert_eq!(store.queue_len().await.unwrap(), 1);

    let still_dirty = store
        .save(NoteDraft::new("A", "z").with_id("n1"))
        .await
        .unwrap();
    assert!(!still_dirty.synced);
    assert_eq!(store.queue_len().await.unwrap(), 2);
}

#[tokio::test]
async fn updated_at_never_precedes_created_at() {
    let store = make_store().await;
    let future = OffsetDateTime::now_utc() + time::Duration::days(1);
    let mut draft = NoteDraft::new("A", "x");
    draft.created_at = Some(future);

    let note = store.save(draft).await.unwrap();

    assert_eq!(note.created_at, truncate_to_micros(future));
    assert!(note.updated_at >= note.created_at);
    assert_eq!(store.get(&note.id).await.unwrap(), Some(note));
}

#[tokio::test]
async fn get_all_returns_most_recent_first() {
    let store = make_store().await;
    store.apply_remote(&remote_note("old", 10)).await.unwrap();
    store.apply_remote(&remote_note("new", 30)).await.unwrap();
    store.apply_remote(&remote_note("mid", 20)).await.unwrap();

    let ids: Vec<_> = store
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|note| note.id)
        .collect();
    assert_eq!(ids, vec!["new", "mid", "old"]);
    assert_eq!(store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn apply_remote_keeps_timestamps_and_never_queues() {
    let store = make_store().await;
    let changes = count_queue_changes(&store);
    let mut incoming = remote_note("n1", 42);
    incoming.synced = false;

    let stored = store.apply_remote(&incoming).await.unwrap().unwrap();

    assert!(stored.synced);
    assert_eq!(stored.updated_at, at(42));
    assert_eq!(store.get("n1").await.unwrap(), Some(stored));
    assert_eq!(store.queue_len().await.unwrap(), 0);
    assert_eq!(changes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn delete_queues_tombstone_even_for_unknown_note() {
    let store = make_store().await;
    let note = store.save(NoteDraft::new("A", "x")).await.unwrap();

    assert!(store.delete(&note.id).await.unwrap());
    assert!(!store.delete("never-existed").await.unwrap());

    assert_eq!(store.get(&note.id).await.unwrap(), None);
    let queue = store.list_queue().await.unwrap();
    assert_eq!(queue.len(), 3);
    assert_eq!(queue[1].mutation, Mutation::Delete { id: note.id.clone() });
    assert_eq!(queue[2].mutation.note_id(), "never-existed");
    assert_eq!(queue[2].operation(), MutationKind::DeleteNote);
}

#[tokio::test]
async fn apply_remote_skips_note_with_queued_change() {
    let store = make_store().await;
    store.apply_remote(&remote_note("n1", 10)).await.unwrap();
    store
        .save(NoteDraft::new("A", "user edit").with_id("n1").dirty())
        .await
        .unwrap();
    let mut newer = remote_note("n1", 10);
    newer.updated_at = timestamp_now() + time::Duration::hours(1);

    assert_eq!(store.apply_remote(&newer).await.unwrap(), None);

    let local = store.get("n1").await.unwrap().unwrap();
    assert_eq!(local.content, "user edit");
    assert!(!local.synced);
    assert_eq!(store.queue_len().await.unwrap(), 1);
}

#[tokio::test]
async fn apply_remote_skips_id_with_queued_delete() {
    let store = make_store().await;
    store
        .enqueue(&Mutation::Delete { id: "gone".into() })
        .await
        .unwrap();

    assert_eq!(store.apply_remote(&remote_note("gone", 10)).await.unwrap(), None);
    assert_eq!(store.get("gone").await.unwrap(), None);
}

#[tokio::test]
async fn apply_remote_only_replaces_strictly_older_copy() {
    let store = make_store().await;
    store.apply_remote(&remote_note("n1", 20)).await.unwrap();

    assert_eq!(store.apply_remote(&remote_note("n1", 10)).await.unwrap(), None);
    assert_eq!(store.apply_remote(&remote_note("n1", 20)).await.unwrap(), None);
    assert!(store.apply_remote(&remote_note("n1", 30)).await.unwrap().is_some());

    assert_eq!(store.get("n1").await.unwrap().unwrap().updated_at, at(30));
}

#[tokio::test]
async fn save_after_merge_snapshot_is_not_overwritten() {
    let store = make_store().await;
    store.apply_remote(&remote_note("zz", 0)).await.unwrap();
    let mut remote = remote_note("zz", 0);
    remote.updated_at = timestamp_now();

    // the merge decided against this snapshot, then the user saved
    let snapshot = store.get("zz").await.unwrap().unwrap();
    assert!(remote.updated_at > snapshot.updated_at);
    let edit = store
        .save(NoteDraft::new("A", "user edit").with_id("zz").dirty())
        .await
        .unwrap();

    assert_eq!(store.apply_remote(&remote).await.unwrap(), None);
    assert_eq!(store.get("zz").await.unwrap(), Some(edit));
}

#[tokio::test]
async fn queue_ids_strictly_increase_in_fifo_order() {
    let store = make_store().await;
    for index in 0..5 {
        store
            .save(NoteDraft::new(format!("note {index}"), ""))
            .await
            .unwrap();
    }

    let queue = store.list_queue().await.unwrap();
    assert_eq!(queue.len(), 5);
    assert!(queue.windows(2).all(|pair| pair[0].queue_id < pair[1].queue_id));
    let titles: Vec<_> = queue
        .iter()
        .map(|entry| match &entry.mutation {
            Mutation::Create(note) => note.title.clone(),
            other => panic!("unexpected mutation {other:?}"),
        })
        .collect();
    assert_eq!(titles[0], "note 0");
    assert_eq!(titles[4], "note 4");
}

#[tokio::test]
async fn queue_change_published_after_each_queued_write() {
    let store = make_store().await;
    let changes = count_queue_changes(&store);

    let note = store.save(NoteDraft::new("A", "x")).await.unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    store.delete(&note.id).await.unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 2);
    store
        .enqueue(&Mutation::Delete { id: "x".into() })
        .await
        .unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 3);
    store.clear_queue().await.unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn clear_queue_removes_everything() {
    let store = make_store().await;
    store.save(NoteDraft::new("A", "x")).await.unwrap();
    store.save(NoteDraft::new("B", "y")).await.unwrap();

    assert_eq!(store.clear_queue().await.unwrap(), 2);
    assert_eq!(store.queue_len().await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn complete_drain_stops_at_snapshot_and_respects_newer_entries() {
    let store = make_store().await;
    let a = store.save(NoteDraft::new("A", "x")).await.unwrap();
    let b = store.save(NoteDraft::new("B", "x")).await.unwrap();
    let snapshot = store.list_queue().await.unwrap();
    let through = snapshot.last().unwrap().queue_id;

    // edited while the pass was talking to the remote
    store
        .save(NoteDraft::new("B", "later").with_id(b.id.clone()))
        .await
        .unwrap();

    let removed = store
        .complete_drain(through, &[a.id.clone(), b.id.clone()])
        .await
        .unwrap();

    assert_eq!(removed, 2);
    assert!(store.get(&a.id).await.unwrap().unwrap().synced);
    assert!(!store.get(&b.id).await.unwrap().unwrap().synced);
    let remaining = store.list_queue().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].mutation.note_id(), b.id);
}

#[tokio::test]
async fn timestamps_keep_microsecond_precision() {
    let store = make_store().await;
    let mut note = remote_note("n1", 1_700_000_000);
    note.updated_at += time::Duration::nanoseconds(123_456_789);

    let stored = store.apply_remote(&note).await.unwrap().unwrap();

    let loaded = store.get("n1").await.unwrap().unwrap();
    assert_eq!(loaded, stored);
    assert_eq!(loaded.updated_at.nanosecond(), 123_456_000);
}

#[tokio::test]
async fn dates_far_from_now_are_stored() {
    let store = make_store().await;
    // 2400-01-01 and 1600-06-01, both outside what i64 nanoseconds can hold
    let future = remote_note("future", 13_569_465_600);
    let mut past = remote_note("past", -11_662_920_000);
    past.created_at = past.updated_at;

    store.apply_remote(&future).await.unwrap();
    store.apply_remote(&past).await.unwrap();

    assert_eq!(
        store.get("future").await.unwrap().unwrap().updated_at,
        future.updated_at
    );
    assert_eq!(
        store.get("past").await.unwrap().unwrap().created_at,
        past.created_at
    );
}

#[tokio::test]
async fn on_disk_store_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("notes.db");

    let store = NoteStore::open(&path).await.unwrap();
    let note = store.save(NoteDraft::new("A", "x")).await.unwrap();
    store.close().await;

    let reopened = NoteStore::open(&path).await.unwrap();
    assert_eq!(reopened.get(&note.id).await.unwrap(), Some(note));
    assert_eq!(reopened.queue_len().await.unwrap(), 1);
}
