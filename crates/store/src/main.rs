// foliod: hosts a Folio store with its compaction job until ctrl-c.

use anyhow::Context;
use folio_store::StoreConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = StoreConfig::load().context("failed to load folio config")?;
    info!(in_memory = config.in_memory, "starting folio store");
    folio_store::runtime::run_standalone(config)
        .await
        .context("folio store terminated unexpectedly")
}
