use std::{fs, path::Path, time::Duration};

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address of the voting contract. The same address is used on every configured chain.
    pub contract_address: Address,
    /// One entry per rollup chain votes may originate from.
    pub chains: Vec<ChainConfig>,
    /// How long a toast notification stays up before it auto-retires. Defaults to 6 seconds.
    #[serde(default = "toast_ttl_default")]
    pub toast_ttl: Duration,
    /// Interval at which proposal statuses are recomputed against wall-clock time.
    /// Defaults to 1 second.
    #[serde(default = "status_refresh_interval_default")]
    pub status_refresh_interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    // Must be ws:// to support subscriptions.
    pub rpc_url: String,
}

fn toast_ttl_default() -> Duration {
    Duration::from_secs(6)
}

fn status_refresh_interval_default() -> Duration {
    Duration::from_secs(1)
}

pub fn read_config(config_file: &Path) -> Result<Config> {
    let config_content = fs::read_to_string(config_file)
        .with_context(|| format!("failed to read config file {config_file:?}"))?;

    Ok(toml::from_str(&config_content)?)
}
