use std::collections::BTreeMap;

use notes_core::Note;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    KeepLocal,
    TakeRemote,
}

// Last writer wins on `updated_at`. Equal timestamps keep the local copy.
pub fn decide(local: Option<&Note>, remote: &Note) -> MergeDecision {
    match local {
        Some(local) if remote.updated_at <= local.updated_at => MergeDecision::KeepLocal,
        _ => MergeDecision::TakeRemote,
    }
}

// Merges a remote listing into the local set. Local-only notes are kept;
// nothing is ever removed.
pub fn resolve_conflicts(local: &[Note], remote: &[Note]) -> Vec<Note> {
    let mut merged: BTreeMap<&str, Note> = local
        .iter()
        .map(|note| (note.id.as_str(), note.clone()))
        .collect();

    for incoming in remote {
        if decide(merged.get(incoming.id.as_str()), incoming) == MergeDecision::TakeRemote {
            let mut taken = incoming.clone();
            taken.synced = true;
            merged.insert(incoming.id.as_str(), taken);
        }
    }

    merged.into_values().collect()
}

pub fn changed_notes(local: &[Note], merged: Vec<Note>) -> Vec<Note> {
    let known: BTreeMap<&str, &Note> = local.iter().map(|note| (note.id.as_str(), note)).collect();
    merged
        .into_iter()
        .filter(|note| match known.get(note.id.as_str()) {
            Some(existing) => existing.updated_at != note.updated_at,
            None => true,
        })
        .collect()
}
