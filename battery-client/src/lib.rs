pub mod domain;
pub mod store;

pub use domain::{BatteryUnit, Bundesland, Snapshot, UnitStatus};
pub use store::{load_latest, SnapshotError, SnapshotStore, WrittenSnapshot};
