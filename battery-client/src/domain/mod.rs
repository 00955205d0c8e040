pub mod battery_unit;
pub mod snapshot;

pub use battery_unit::{BatteryUnit, Bundesland, PowerCategory, UnitStatus, UNKNOWN_LABEL};
pub use snapshot::Snapshot;
