// editlake-ingest: stream the recentchange feed into bronze storage.

use anyhow::Result;
use tracing::info;

use editlake::config::Config;
use editlake::storage::BronzeStore;
use editlake::{init, stream};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init::init_tracing(&config.log);

    info!(
        backend = %config.storage.backend,
        min_lines = config.flush.min_lines,
        max_secs = config.flush.max_secs,
        wiki_filter = config.stream.wiki_filter.as_deref().unwrap_or("<none>"),
        "ingest starting"
    );

    let store = BronzeStore::from_config(&config.storage)?;
    stream::run(&config.stream, config.flush.flush_config(), &store).await?;

    info!("ingest stopped");
    Ok(())
}
