use std::collections::BTreeMap;

use battery_client::{
    domain::{BatteryUnit, Snapshot},
    store::{SnapshotStore, WrittenSnapshot},
};
use futures::StreamExt;
use time::OffsetDateTime;

use crate::pipeline::{Envelope, PipelineError, Sink};

/// What one run of the sink produced.
#[derive(Debug, Clone)]
pub struct SinkReport {
    pub snapshot: Snapshot,
    pub parse_errors: u64,
    pub duplicates: u64,
    /// `None` when the write was skipped because nothing changed.
    pub written: Option<WrittenSnapshot>,
}

/// Collects every unit of a run, keeps the last record seen per `unit_id`,
/// and writes the result as one snapshot.
pub struct SnapshotFileSink {
    store: SnapshotStore,
    skip_unchanged: bool,
}

impl SnapshotFileSink {
    pub fn new(store: SnapshotStore, skip_unchanged: bool) -> Self {
        Self { store, skip_unchanged }
    }

    fn unchanged(&self, snapshot: &Snapshot) -> bool {
        match self.store.load_latest() {
            Ok(previous) => previous.fingerprint() == snapshot.fingerprint(),
            Err(_) => false,
        }
    }

    fn finish(&self, snapshot: &Snapshot) -> Result<Option<WrittenSnapshot>, PipelineError> {
        if self.skip_unchanged && self.unchanged(snapshot) {
            tracing::info!(
                path = %self.store.latest_path().display(),
                units = snapshot.len(),
                "registry data unchanged, leaving snapshot files untouched"
            );
            return Ok(None);
        }

        // Snapshots are a few thousand records; the blocking write runs inline.
        let written = self
            .store
            .write(snapshot)
            .map_err(|e| PipelineError::Sink(e.to_string()))?;
        tracing::info!(
            archive = %written.archive_path.display(),
            latest = %written.latest_path.display(),
            units = snapshot.len(),
            "snapshot written"
        );
        Ok(Some(written))
    }
}

#[async_trait::async_trait]
impl Sink<BatteryUnit> for SnapshotFileSink {
    type Output = SinkReport;

    async fn run<S>(&self, mut input: S) -> Result<SinkReport, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<BatteryUnit>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut units: BTreeMap<String, BatteryUnit> = BTreeMap::new();
        let mut parse_errors: u64 = 0;
        let mut duplicates: u64 = 0;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) if e.is_record_level() => {
                    parse_errors += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "collector run aborted, previous snapshot left in place");
                    return Err(e);
                }
            };

            let unit = env.payload;
            if let Some(previous) = units.insert(unit.unit_id.clone(), unit) {
                duplicates += 1;
                metrics::counter!("collector_duplicates_total").increment(1);
                tracing::debug!(unit_id = %previous.unit_id, page = env.page, "duplicate unit id, keeping the later record");
            }
        }

        if units.is_empty() {
            tracing::warn!("registry returned no usable units; writing an empty snapshot");
        }

        let captured_at = OffsetDateTime::now_utc();
        let captured_at = captured_at.replace_nanosecond(0).unwrap_or(captured_at);
        let snapshot = Snapshot::new(captured_at, units.into_values().collect());
        let written = self.finish(&snapshot)?;

        Ok(SinkReport {
            snapshot,
            parse_errors,
            duplicates,
            written,
        })
    }
}
