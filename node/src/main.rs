// COINjecture consensus node
// Storage + engine actors + pacer; transport and RPC attach via submit()

mod config;
mod service;

use anyhow::{Context, Result};
use coinjecture_core::types::HardwareTier;
use coinjecture_storage::ChainStore;
use config::NodeConfig;
use service::NodeService;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::parse_args();
    config.validate().map_err(anyhow::Error::msg)?;

    let level = if config.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!(
        network = %config.network_id,
        data_dir = %config.data_dir.display(),
        "starting coinjecture node"
    );

    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;
    let store = ChainStore::open(config.chain_db_path()).context("opening chain store")?;

    let params = config.chain_params();
    let service = NodeService::start(params, store).await?;

    if config.mine {
        let seed = config
            .miner_seed_bytes()
            .context("miner seed must be valid hex")?;
        let tier = HardwareTier::from_u8(config.tier).context("unknown tier")?;
        service.start_producer(seed, tier, Duration::from_secs(config.block_time));
        info!(tier = config.tier, "local block producer enabled");
    }

    let view = service.handle().snapshot().await?;
    info!(
        height = view.tip.height,
        tip = %hex::encode(view.tip.header_hash),
        "node ready"
    );

    tokio::signal::ctrl_c().await.context("waiting for shutdown")?;
    info!("shutting down");
    service.shutdown().await;
    Ok(())
}
