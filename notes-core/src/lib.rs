mod client;
mod memory;
mod note;
mod remote;

pub use client::NotesClient;
pub use memory::{MemoryRemote, RemoteCall};
pub use note::{Note, NoteDraft, timestamp_now, truncate_to_micros};
pub use remote::{ApiErrorClass, DeleteOutcome, RemoteError, RemoteNotes};
