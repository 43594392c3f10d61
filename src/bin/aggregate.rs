// editlake-aggregate: one pass of the bronze -> gold batch job.
//
// Idempotent and restartable: reruns over the same window claim nothing
// new and leave gold untouched.

use anyhow::{Context, Result};
use tracing::info;

use editlake::config::Config;
use editlake::gold::GoldStore;
use editlake::storage::BronzeStore;
use editlake::{aggregate, init};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init::init_tracing(&config.log);

    info!(
        backend = %config.storage.backend,
        window_hours = config.aggregator.window_hours,
        "aggregation pass starting"
    );

    let store = BronzeStore::from_config(&config.storage)?;
    let gold = GoldStore::connect(&config.database.url)
        .await
        .context("failed to connect to the gold database")?;
    gold.ensure_schema().await.context("failed to ensure gold schema")?;

    let (processed, skipped) =
        aggregate::run_window(&store, &gold, config.aggregator.window_hours).await?;

    info!(processed, skipped, "aggregation pass complete");
    Ok(())
}
