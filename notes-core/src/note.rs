use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A text record as stored locally and exchanged with the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub synced: bool,
}

impl Note {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = timestamp_now();
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
            synced: false,
        }
    }
}

/// The current time, truncated to the microsecond precision notes are kept at.
pub fn timestamp_now() -> OffsetDateTime {
    truncate_to_micros(OffsetDateTime::now_utc())
}

pub fn truncate_to_micros(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(at.nanosecond() / 1_000 * 1_000)
        .unwrap_or(at)
}

/// Input to a local save.
///
/// `id` and `created_at` are filled in by the store when absent. `synced` is
/// tri-state: `None` leaves an already-synced record synced, `Some(false)`
/// marks the record dirty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteDraft {
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    pub created_at: Option<OffsetDateTime>,
    pub synced: Option<bool>,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn dirty(mut self) -> Self {
        self.synced = Some(false);
        self
    }
}

impl From<Note> for NoteDraft {
    fn from(note: Note) -> Self {
        Self {
            id: Some(note.id),
            title: note.title,
            content: note.content,
            created_at: Some(note.created_at),
            synced: Some(note.synced),
        }
    }
}
