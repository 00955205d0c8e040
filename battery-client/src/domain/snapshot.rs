use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::BatteryUnit;

/// One collector run's output. Written once, never mutated; the next run
/// replaces the latest file wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub units: Vec<BatteryUnit>,
}

impl Snapshot {
    pub fn new(captured_at: OffsetDateTime, units: Vec<BatteryUnit>) -> Self {
        Self { captured_at, units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// blake3 digest of the serialized unit list. `captured_at` is excluded so
    /// two runs that saw the same registry state agree.
    pub fn fingerprint(&self) -> String {
        let mut h = blake3::Hasher::new();
        h.update(&(self.units.len() as u64).to_le_bytes());
        for unit in &self.units {
            // BatteryUnit contains only strings, numbers and options; encoding cannot fail.
            let bytes = serde_json::to_vec(unit).unwrap_or_default();
            h.update(&(bytes.len() as u64).to_le_bytes());
            h.update(&bytes);
        }
        h.finalize().to_hex().to_string()
    }
}
