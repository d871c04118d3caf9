pub mod engine;
pub mod events;

pub use engine::{EventIndexer, IndexerSettings, IndexerState, SyncOutcome};
