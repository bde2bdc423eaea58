//! Persisted premium history: date-keyed CSV snapshots guarded by optimistic
//! concurrency against the remote store.

pub mod remote;
pub mod snapshot;
pub mod types;

pub use remote::{LocalFileStore, VersionToken, VersionedStore, WriteError};
pub use snapshot::SnapshotStore;
pub use types::HistoryRow;
