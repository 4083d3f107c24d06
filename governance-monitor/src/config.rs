// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{DEFAULT_GOVERNOR_ADDRESS, DEFAULT_TOKEN_ADDRESS};
use crate::types::DEFAULT_PROTOCOL;
use anyhow::{anyhow, Context};
use ethers::types::{Address, U256};
use governance_monitor_config::Config;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Roughly one month of mainnet blocks
pub const DEFAULT_OBSERVATION_PERIOD: u64 = 180_000;
pub const DEFAULT_VOTING_POWER_CHANGE_THRESHOLD: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 12_000;
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 1_000;
pub const DEFAULT_CHANNEL_SIZE: usize = 1_000;
pub const DEFAULT_METRICS_PORT: u16 = 9184;

/// Knobs shared by the cast-vote and end-voting correlators
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DetectionConfig {
    // Blocks before a proposal's start block in which power increases count
    #[serde(default = "default_observation_period")]
    pub observation_period_before_voting: u64,
    // Blocks after a proposal's end block in which power decreases count
    #[serde(default = "default_observation_period")]
    pub observation_period_after_voting: u64,
    // Minimum power delta (in token base units) that qualifies, exclusive
    #[serde(
        with = "decimal_u256",
        default = "default_voting_power_change_threshold"
    )]
    pub voting_power_change_threshold: U256,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            observation_period_before_voting: DEFAULT_OBSERVATION_PERIOD,
            observation_period_after_voting: DEFAULT_OBSERVATION_PERIOD,
            voting_power_change_threshold: default_voting_power_change_threshold(),
        }
    }
}

impl DetectionConfig {
    pub fn new(
        observation_period_before_voting: u64,
        observation_period_after_voting: u64,
        voting_power_change_threshold: U256,
    ) -> Self {
        Self {
            observation_period_before_voting,
            observation_period_after_voting,
            voting_power_change_threshold,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GovernanceMonitorConfig {
    // Rpc url for the Eth fullnode. Supports ${ENV_VAR} substitution.
    pub eth_rpc_url: String,
    #[serde(default = "default_governor_address")]
    pub governor_address: String,
    #[serde(default = "default_token_address")]
    pub token_address: String,
    // First block to sync; latest block when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_block: Option<u64>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    // Retry budget for checkpoint queries; no retries when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_retry_max_elapsed_secs: Option<u64>,
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl Config for GovernanceMonitorConfig {}

/// Config with every address and url parsed
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub eth_rpc_url: Url,
    pub governor_address: Address,
    pub token_address: Address,
    pub start_block: Option<u64>,
    pub poll_interval: Duration,
    pub max_block_range: u64,
    pub channel_size: usize,
    pub metrics_port: u16,
    pub protocol: String,
    pub oracle_retry_max_elapsed: Option<Duration>,
    pub detection: DetectionConfig,
}

impl GovernanceMonitorConfig {
    pub fn new(eth_rpc_url: impl Into<String>) -> Self {
        Self {
            eth_rpc_url: eth_rpc_url.into(),
            governor_address: default_governor_address(),
            token_address: default_token_address(),
            start_block: None,
            poll_interval: default_poll_interval(),
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            channel_size: DEFAULT_CHANNEL_SIZE,
            metrics_port: DEFAULT_METRICS_PORT,
            protocol: default_protocol(),
            oracle_retry_max_elapsed_secs: None,
            detection: DetectionConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<ValidatedConfig> {
        info!("Starting config validation");
        let eth_rpc_url = Url::parse(&self.eth_rpc_url)
            .with_context(|| format!("Invalid eth-rpc-url: {}", self.eth_rpc_url))?;
        let governor_address = Address::from_str(&self.governor_address)
            .with_context(|| format!("Invalid governor-address: {}", self.governor_address))?;
        let token_address = Address::from_str(&self.token_address)
            .with_context(|| format!("Invalid token-address: {}", self.token_address))?;
        if governor_address == token_address {
            return Err(anyhow!(
                "governor-address and token-address must differ, both are {:?}",
                governor_address
            ));
        }
        if self.max_block_range == 0 {
            return Err(anyhow!("max-block-range must be greater than 0"));
        }
        if self.channel_size == 0 {
            return Err(anyhow!("channel-size must be greater than 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll-interval-ms must be greater than 0"));
        }
        if self.protocol.trim().is_empty() {
            return Err(anyhow!("protocol must not be empty"));
        }

        info!(
            "Config validated: governor={:?}, token={:?}, detection={:?}",
            governor_address, token_address, self.detection
        );
        Ok(ValidatedConfig {
            eth_rpc_url,
            governor_address,
            token_address,
            start_block: self.start_block,
            poll_interval: self.poll_interval,
            max_block_range: self.max_block_range,
            channel_size: self.channel_size,
            metrics_port: self.metrics_port,
            protocol: self.protocol.clone(),
            oracle_retry_max_elapsed: self.oracle_retry_max_elapsed_secs.map(Duration::from_secs),
            detection: self.detection.clone(),
        })
    }
}

fn default_observation_period() -> u64 {
    DEFAULT_OBSERVATION_PERIOD
}

fn default_voting_power_change_threshold() -> U256 {
    U256::from(DEFAULT_VOTING_POWER_CHANGE_THRESHOLD)
}

fn default_governor_address() -> String {
    DEFAULT_GOVERNOR_ADDRESS.to_string()
}

fn default_token_address() -> String {
    DEFAULT_TOKEN_ADDRESS.to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
}

fn default_max_block_range() -> u64 {
    DEFAULT_MAX_BLOCK_RANGE
}

fn default_channel_size() -> usize {
    DEFAULT_CHANNEL_SIZE
}

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

/// U256 written as a decimal string. Plain integers are accepted on input.
mod decimal_u256 {
    use ethers::types::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(U256::from(n)),
            Raw::Text(s) => U256::from_dec_str(s.trim())
                .map_err(|e| de::Error::custom(format!("invalid decimal integer {:?}: {}", s, e))),
        }
    }
}
