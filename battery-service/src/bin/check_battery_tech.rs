//! Asks the registry how many units carry each battery technology code.
//! Useful when the provider adds a code the parser does not know yet.

use std::time::Duration;

use anyhow::Result;
use battery_service::{
    config::AppConfig, observability, sources::MastrClient,
    transform::mastr_record::battery_technology_name,
};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "check_battery_tech")]
struct Cli {
    #[arg(long, env = "MASTR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value_t = 727)]
    first_code: i64,

    #[arg(long, default_value_t = 740)]
    last_code: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cli = Cli::parse();
    let cfg = AppConfig::load()?;
    let registry = &cfg.registry;

    let client = MastrClient::new(
        &registry.base_url,
        cli.api_key.as_deref().unwrap_or_default(),
        Duration::from_secs(registry.timeout_secs),
        registry.max_retries,
        Duration::from_millis(registry.retry_backoff_ms),
        Duration::from_millis(registry.max_backoff_ms),
    )?;

    for code in cli.first_code..=cli.last_code {
        let filter = format!("Batterietechnologie~eq~{code}");
        let label = battery_technology_name(code).unwrap_or("(unmapped)");

        match client.fetch_page(&filter, 1, 10).await {
            Ok(page) => {
                let total = page.total.unwrap_or(page.len() as u64);
                if total > 0 {
                    let sample = page
                        .data
                        .as_ref()
                        .and_then(|d| d.first())
                        .and_then(|r| r.get("EinheitName").or_else(|| r.get("EinheitMastrNummer")))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    println!("{code:>4}  {label:<48} {total} units  e.g. {sample}");
                } else {
                    println!("{code:>4}  {label:<48} -");
                }
            }
            Err(e) => {
                tracing::warn!(code, error = %e, "technology probe failed");
                println!("{code:>4}  {label:<48} error: {e}");
            }
        }
    }

    Ok(())
}
