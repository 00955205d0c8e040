use std::path::PathBuf;

use anyhow::Result;
use battery_service::{
    config::AppConfig,
    dashboard::{self, AppState},
    metrics_server, observability,
};
use clap::Parser;

/// Serves the battery storage dashboard over the latest snapshot.
#[derive(Debug, Parser)]
#[command(name = "dashboard", version)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8501.
    #[arg(long)]
    bind: Option<String>,

    /// Snapshot file to read instead of the collector's latest file.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Chart only the K largest Bundesländer.
    #[arg(long)]
    top_k: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    let snapshot_path = cli.snapshot.clone().unwrap_or_else(|| cfg.dashboard_snapshot_path());
    let bind_addr = cli.bind.clone().unwrap_or_else(|| cfg.dashboard.bind_addr.clone());
    let top_k = cli.top_k.or(cfg.dashboard.top_k_bundeslaender);

    let state = AppState::load(snapshot_path, top_k)?;
    let mut app = dashboard::router(state);

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::install()?;
        app = app.merge(metrics_server::routes(&metrics_cfg.path));
    }

    dashboard::serve(&bind_addr, app).await
}
