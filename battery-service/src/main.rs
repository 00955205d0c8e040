use std::path::PathBuf;

use anyhow::Result;
use battery_service::{collect, config::AppConfig, observability};
use clap::Parser;

/// Downloads battery storage units from the Marktstammdatenregister and
/// writes the latest snapshot plus a timestamped archive copy.
#[derive(Debug, Parser)]
#[command(name = "battery-collector", version)]
struct Cli {
    /// TOML config file (defaults to $BATTERY_CONFIG, then battery-config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Registry subscription key.
    #[arg(long, env = "MASTR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Minimum gross power in kW.
    #[arg(long)]
    min_power: Option<f64>,

    /// Minimum usable storage capacity in kWh.
    #[arg(long)]
    min_capacity: Option<f64>,

    #[arg(long)]
    page_size: Option<u32>,

    #[arg(long)]
    max_pages: Option<u32>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Leave the files alone when the unit set did not change.
    #[arg(long)]
    skip_unchanged: bool,

    /// Keep storage units without a known battery technology code.
    #[arg(long)]
    include_non_battery: bool,
}

impl Cli {
    fn apply(&self, cfg: &mut AppConfig) {
        if let Some(v) = self.min_power {
            cfg.collector.min_power_kw = v;
        }
        if let Some(v) = self.min_capacity {
            cfg.collector.min_capacity_kwh = v;
        }
        if let Some(v) = self.page_size {
            cfg.registry.page_size = v;
        }
        if let Some(v) = self.max_pages {
            cfg.registry.max_pages = v;
        }
        if let Some(dir) = &self.output_dir {
            cfg.collector.output_dir = dir.clone();
        }
        if self.skip_unchanged {
            cfg.collector.skip_unchanged = true;
        }
        if self.include_non_battery {
            cfg.collector.battery_only = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    cli.apply(&mut cfg);

    // Empty key surfaces as an auth error from the client.
    let api_key = cli.api_key.clone().unwrap_or_default();

    let report = collect(&cfg.registry, &cfg.collector, &api_key).await?;

    match &report.written {
        Some(written) => println!(
            "Saved {} battery units to {} (archive {})",
            report.snapshot.len(),
            written.latest_path.display(),
            written.archive_path.display()
        ),
        None => println!(
            "No changes: {} battery units already on disk",
            report.snapshot.len()
        ),
    }
    if report.not_battery > 0 {
        println!("Ignored {} non-battery storage units", report.not_battery);
    }
    if report.parse_errors > 0 {
        println!("Skipped {} malformed records", report.parse_errors);
    }

    Ok(())
}
