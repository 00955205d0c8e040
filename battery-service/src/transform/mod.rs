pub mod mastr_record;

use std::sync::atomic::{AtomicU64, Ordering};

use battery_client::domain::BatteryUnit;
use serde_json::Value;

use crate::pipeline::{Envelope, PipelineError, Transform};

pub use mastr_record::{is_battery_technology, parse_record, RecordError};

/// Pure threshold check.
///
/// Rules:
/// - keep iff `power_kw >= min_power_kw` and `capacity_kwh >= min_capacity_kwh`.
pub fn passes_thresholds(unit: &BatteryUnit, min_power_kw: f64, min_capacity_kwh: f64) -> bool {
    unit.power_kw >= min_power_kw && unit.capacity_kwh >= min_capacity_kwh
}

/// Raw registry JSON -> `BatteryUnit`. Failures become record-level
/// `PipelineError::Parse` items.
#[derive(Clone, Default)]
pub struct MastrRecordParser;

#[async_trait::async_trait]
impl Transform<Value, BatteryUnit> for MastrRecordParser {
    async fn apply(&self, input: Envelope<Value>) -> Result<Option<Envelope<BatteryUnit>>, PipelineError> {
        match parse_record(&input.payload) {
            Ok(unit) => Ok(Some(input.map(unit))),
            Err(e) => {
                let id = input
                    .payload
                    .get("EinheitMastrNummer")
                    .and_then(Value::as_str)
                    .unwrap_or("<unknown>");
                tracing::debug!(page = input.page, unit_id = id, error = %e, "skipping unparseable registry record");
                metrics::counter!("mastr_parse_errors_total").increment(1);
                Err(PipelineError::Parse(format!("page {} record {id}: {e}", input.page)))
            }
        }
    }
}

/// Drops units below the configured minimum power or capacity.
#[derive(Default)]
pub struct ThresholdFilter {
    min_power_kw: f64,
    min_capacity_kwh: f64,
    rejected: AtomicU64,
}

impl ThresholdFilter {
    pub fn new(min_power_kw: f64, min_capacity_kwh: f64) -> Self {
        Self {
            min_power_kw,
            min_capacity_kwh,
            rejected: AtomicU64::new(0),
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transform<BatteryUnit, BatteryUnit> for ThresholdFilter {
    async fn apply(&self, input: Envelope<BatteryUnit>) -> Result<Option<Envelope<BatteryUnit>>, PipelineError> {
        if passes_thresholds(&input.payload, self.min_power_kw, self.min_capacity_kwh) {
            return Ok(Some(input));
        }

        tracing::debug!(
            unit_id = %input.payload.unit_id,
            power_kw = input.payload.power_kw,
            capacity_kwh = input.payload.capacity_kwh,
            "unit below thresholds"
        );
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("collector_threshold_rejected_total").increment(1);
        Ok(None)
    }
}

/// Drops storage units whose technology is not a known battery chemistry
/// (unknown code, no code, or free text).
#[derive(Default)]
pub struct BatteryTechnologyFilter {
    rejected: AtomicU64,
}

impl BatteryTechnologyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transform<BatteryUnit, BatteryUnit> for BatteryTechnologyFilter {
    async fn apply(&self, input: Envelope<BatteryUnit>) -> Result<Option<Envelope<BatteryUnit>>, PipelineError> {
        if is_battery_technology(&input.payload.technology) {
            return Ok(Some(input));
        }

        tracing::debug!(
            unit_id = %input.payload.unit_id,
            technology = %input.payload.technology,
            "storage unit is not a known battery technology"
        );
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("collector_technology_rejected_total").increment(1);
        Ok(None)
    }
}
