use std::{sync::Arc, time::Duration};

use battery_client::{
    domain::{BatteryUnit, Snapshot},
    store::{SnapshotStore, WrittenSnapshot},
};

use crate::{
    config::{CollectorConfig, RegistryConfig},
    pipeline::{Pipeline, PipelineError, Transform},
    sinks::SnapshotFileSink,
    sources::{registry_filter, MastrClient, MastrHttpSource},
    transform::{BatteryTechnologyFilter, MastrRecordParser, ThresholdFilter},
};

/// Outcome of one collector run.
#[derive(Debug, Clone)]
pub struct CollectReport {
    pub snapshot: Snapshot,
    pub parse_errors: u64,
    pub duplicates: u64,
    pub below_threshold: u64,
    /// Storage units dropped because their technology is not a battery.
    pub not_battery: u64,
    /// `None` when `skip_unchanged` found nothing new to write.
    pub written: Option<WrittenSnapshot>,
}

fn check_threshold(name: &str, value: f64) -> Result<(), PipelineError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PipelineError::Config(format!("{name} must be a non-negative number, got {value}")))
    }
}

/// Fetches every battery unit from the registry, keeps those at or above the
/// thresholds in `collector`, and writes the snapshot files.
///
/// Fails with `PipelineError::Auth` for a missing or rejected key and with
/// `PipelineError::TransientFetch` once a page exhausts its retries. Records
/// that fail to parse are counted in the report instead.
pub async fn collect(
    registry: &RegistryConfig,
    collector: &CollectorConfig,
    api_key: &str,
) -> Result<CollectReport, PipelineError> {
    check_threshold("min_power_kw", collector.min_power_kw)?;
    check_threshold("min_capacity_kwh", collector.min_capacity_kwh)?;

    let client = Arc::new(MastrClient::new(
        &registry.base_url,
        api_key,
        Duration::from_secs(registry.timeout_secs),
        registry.max_retries,
        Duration::from_millis(registry.retry_backoff_ms),
        Duration::from_millis(registry.max_backoff_ms),
    )?);

    let filter = registry_filter(
        collector.min_power_kw,
        collector.min_capacity_kwh,
        registry.storage_technology_code,
    );
    let source = MastrHttpSource::new(client, filter, registry.page_size, registry.max_pages);

    let thresholds = Arc::new(ThresholdFilter::new(
        collector.min_power_kw,
        collector.min_capacity_kwh,
    ));
    let store = SnapshotStore::new(
        &collector.output_dir,
        &collector.latest_file_name,
        &collector.archive_prefix,
    );

    let technology = Arc::new(BatteryTechnologyFilter::new());

    let mut transforms: Vec<Arc<dyn Transform<BatteryUnit, BatteryUnit> + Send + Sync>> = Vec::new();
    if collector.battery_only {
        transforms.push(technology.clone());
    }
    transforms.push(thresholds.clone());
    let pipeline: Pipeline<_, serde_json::Value, BatteryUnit, _> = Pipeline {
        source,
        parser: Arc::new(MastrRecordParser),
        transforms,
        sink: SnapshotFileSink::new(store, collector.skip_unchanged),
    };

    let report = pipeline.run().await?;

    tracing::info!(
        units = report.snapshot.len(),
        parse_errors = report.parse_errors,
        duplicates = report.duplicates,
        below_threshold = thresholds.rejected(),
        not_battery = technology.rejected(),
        "collector run finished"
    );

    Ok(CollectReport {
        snapshot: report.snapshot,
        parse_errors: report.parse_errors,
        duplicates: report.duplicates,
        below_threshold: thresholds.rejected(),
        not_battery: technology.rejected(),
        written: report.written,
    })
}
