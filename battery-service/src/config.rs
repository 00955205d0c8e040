use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::sources::mastr_http::DEFAULT_BASE_URL;

pub const CONFIG_ENV: &str = "BATTERY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "battery-config.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub base_url: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
    pub storage_technology_code: Option<u32>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 1000,
            max_pages: 500,
            max_retries: 4,
            retry_backoff_ms: 500,
            max_backoff_ms: 30_000,
            timeout_secs: 30,
            storage_technology_code: Some(524),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub min_power_kw: f64,
    pub min_capacity_kwh: f64,
    pub output_dir: PathBuf,
    pub latest_file_name: String,
    pub archive_prefix: String,
    pub skip_unchanged: bool,
    /// Keep only units with a known battery technology code (727..=732).
    pub battery_only: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            min_power_kw: 0.0,
            min_capacity_kwh: 0.0,
            output_dir: PathBuf::from("data"),
            latest_file_name: "battery_units_latest.json".to_string(),
            archive_prefix: "battery_units".to_string(),
            skip_unchanged: false,
            battery_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub bind_addr: String,
    pub snapshot_path: Option<PathBuf>,
    pub top_k_bundeslaender: Option<usize>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8501".to_string(),
            snapshot_path: None,
            top_k_bundeslaender: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub registry: RegistryConfig,
    pub collector: CollectorConfig,
    pub dashboard: DashboardConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    /// Reads `$BATTERY_CONFIG`, else `battery-config.toml`. Only the implicit
    /// default path may be absent; then built-in defaults apply.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        match env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(Path::new(&path)),
            Err(_) => Self::load_default(),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        Self::parse(&contents)
    }

    fn load_default() -> anyhow::Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!("no {DEFAULT_CONFIG_PATH} found, using built-in defaults");
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    /// Latest-file path the dashboard reads: explicit setting, else the
    /// collector's output location.
    pub fn dashboard_snapshot_path(&self) -> PathBuf {
        self.dashboard.snapshot_path.clone().unwrap_or_else(|| {
            self.collector
                .output_dir
                .join(&self.collector.latest_file_name)
        })
    }
}
