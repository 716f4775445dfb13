/// Snapshot diffing for incident lifecycle changes
pub mod diff_engine;

pub use diff_engine::{diff, diff_snapshots, DiffOutcome, KnownUpdates};
