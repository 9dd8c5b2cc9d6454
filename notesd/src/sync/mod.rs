pub mod backoff;
mod conflict;
pub mod connectivity;
pub mod engine;
pub mod events;
pub mod queue;
pub mod status;
pub mod store;
