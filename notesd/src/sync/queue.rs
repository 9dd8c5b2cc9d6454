use notes_core::Note;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("invalid mutation kind: {0}")]
    InvalidKind(String),
    #[error("invalid mutation payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    CreateNote,
    UpdateNote,
    DeleteNote,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::CreateNote => "CREATE_NOTE",
            MutationKind::UpdateNote => "UPDATE_NOTE",
            MutationKind::DeleteNote => "DELETE_NOTE",
        }
    }

    pub fn parse(value: &str) -> Result<Self, MutationError> {
        match value {
            "CREATE_NOTE" => Ok(MutationKind::CreateNote),
            "UPDATE_NOTE" => Ok(MutationKind::UpdateNote),
            "DELETE_NOTE" => Ok(MutationKind::DeleteNote),
            other => Err(MutationError::InvalidKind(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Tombstone {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create(Note),
    Update(Note),
    Delete { id: String },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create(_) => MutationKind::CreateNote,
            Mutation::Update(_) => MutationKind::UpdateNote,
            Mutation::Delete { .. } => MutationKind::DeleteNote,
        }
    }

    pub fn note_id(&self) -> &str {
        match self {
            Mutation::Create(note) | Mutation::Update(note) => &note.id,
            Mutation::Delete { id } => id,
        }
    }

    pub fn payload_json(&self) -> Result<String, MutationError> {
        Ok(match self {
            Mutation::Create(note) | Mutation::Update(note) => serde_json::to_string(note)?,
            Mutation::Delete { id } => serde_json::to_string(&Tombstone { id: id.clone() })?,
        })
    }

    pub fn from_parts(kind: &str, payload: &str) -> Result<Self, MutationError> {
        Ok(match MutationKind::parse(kind)? {
            MutationKind::CreateNote => Mutation::Create(serde_json::from_str(payload)?),
            MutationKind::UpdateNote => Mutation::Update(serde_json::from_str(payload)?),
            MutationKind::DeleteNote => {
                let tombstone: Tombstone = serde_json::from_str(payload)?;
                Mutation::Delete { id: tombstone.id }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub queue_id: i64,
    pub mutation: Mutation,
    pub enqueued_at: OffsetDateTime,
}

impl QueueEntry {
    pub fn operation(&self) -> MutationKind {
        self.mutation.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_wire_names() {
        for kind in [
            MutationKind::CreateNote,
            MutationKind::UpdateNote,
            MutationKind::DeleteNote,
        ] {
            assert_eq!(MutationKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(matches!(
            MutationKind::parse("MOVE_NOTE"),
            Err(MutationError::InvalidKind(_))
        ));
    }

    #[test]
    fn delete_payload_carries_only_the_id() {
        let mutation = Mutation::Delete { id: "n1".into() };
        let payload = mutation.payload_json().unwrap();
        assert_eq!(payload, r#"{"id":"n1"}"#);
        assert_eq!(
            Mutation::from_parts("DELETE_NOTE", &payload).unwrap(),
            mutation
        );
    }

    #[test]
    fn update_payload_restores_full_note() {
        let note = Note::new("n1", "A", "x");
        let payload = Mutation::Update(note.clone()).payload_json().unwrap();
        let restored = Mutation::from_parts("UPDATE_NOTE", &payload).unwrap();
        assert_eq!(restored.note_id(), "n1");
        assert_eq!(restored, Mutation::Update(note));
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        assert!(matches!(
            Mutation::from_parts("CREATE_NOTE", r#"{"id":"n1"}"#),
            Err(MutationError::Payload(_))
        ));
    }
}
