// Node configuration
// CLI args and runtime configuration

use clap::Parser;
use coinjecture_core::params::ChainParams;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "COINjecture consensus node", long_about = None)]
pub struct NodeConfig {
    /// Data directory for chain storage
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Network id (domain separation for salts and signatures)
    #[arg(long, default_value = "coinjecture-main")]
    pub network_id: String,

    /// Enable the local block producer
    #[arg(long)]
    pub mine: bool,

    /// Miner key seed (hex, 64 chars); required with --mine
    #[arg(long)]
    pub miner_seed: Option<String>,

    /// Hardware tier for the local producer: 1 mobile, 2 desktop, 3 server
    #[arg(long, default_value = "2")]
    pub tier: u8,

    /// Target seconds between locally produced blocks
    #[arg(long, default_value = "60")]
    pub block_time: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl NodeConfig {
    pub fn parse_args() -> Self {
        NodeConfig::parse()
    }

    pub fn chain_db_path(&self) -> PathBuf {
        self.data_dir.join("chain.redb")
    }

    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            network_id: self.network_id.clone(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.network_id.is_empty() {
            return Err("network id must not be empty".to_string());
        }

        if coinjecture_core::types::HardwareTier::from_u8(self.tier).is_none() {
            return Err(format!("unknown tier {}; use 1, 2, or 3", self.tier));
        }

        if self.mine {
            match &self.miner_seed {
                None => return Err("--mine requires --miner-seed".to_string()),
                Some(seed) => {
                    if seed.len() != 64 || !seed.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err("miner seed must be 64 hex characters (32 bytes)".to_string());
                    }
                }
            }
        }

        if self.block_time < 10 {
            return Err("block time must be at least 10 seconds".to_string());
        }

        self.chain_params().validate()
    }

    pub fn miner_seed_bytes(&self) -> Option<[u8; 32]> {
        let seed = self.miner_seed.as_ref()?;
        let bytes = hex::decode(seed).ok()?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> NodeConfig {
        NodeConfig {
            data_dir: PathBuf::from("./data"),
            network_id: "coinjecture-test".to_string(),
            mine: false,
            miner_seed: None,
            tier: 2,
            block_time: 60,
            verbose: false,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_mining_requires_seed() {
        let mut config = base_config();
        config.mine = true;
        assert!(config.validate().is_err());

        config.miner_seed = Some("zz".repeat(32));
        assert!(config.validate().is_err());

        config.miner_seed = Some("ab".repeat(32));
        assert!(config.validate().is_ok());
        assert!(config.miner_seed_bytes().is_some());
    }

    #[test]
    fn test_invalid_tier_rejected() {
        let mut config = base_config();
        config.tier = 9;
        assert!(config.validate().is_err());
    }
}
