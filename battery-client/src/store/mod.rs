pub mod snapshot_files;

pub use snapshot_files::{load_latest, write_atomic, SnapshotError, SnapshotStore, WrittenSnapshot};
