// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Historical voting power lookups.
//!
//! The cast-vote correlator only needs two questions answered about a voter:
//! how many checkpoints exist, and what the checkpoint at a given index holds.
//! [`CheckpointOracle`] is that seam; [`EthCheckpointOracle`] answers it from
//! the token contract.

use crate::abi::GovernanceToken;
use crate::error::{MonitorError, MonitorResult};
use crate::metrics::GovernanceMonitorMetrics;
use crate::retry_with_max_elapsed_time;
use crate::types::Checkpoint;
use async_trait::async_trait;
use ethers::contract::ContractError;
use ethers::providers::Middleware;
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;

#[async_trait]
pub trait CheckpointOracle: Send + Sync {
    /// Number of voting power checkpoints recorded for `voter`
    async fn checkpoint_count(&self, voter: Address) -> MonitorResult<u64>;

    /// Checkpoint at `index`, where `count - 1` is the most recent
    async fn checkpoint_at(&self, voter: Address, index: u64) -> MonitorResult<Checkpoint>;
}

pub struct EthCheckpointOracle<M> {
    token: GovernanceToken<M>,
    retry_max_elapsed: Option<Duration>,
    metrics: Option<Arc<GovernanceMonitorMetrics>>,
}

impl<M: Middleware + 'static> EthCheckpointOracle<M> {
    pub fn new(client: Arc<M>, token_address: Address) -> Self {
        Self {
            token: GovernanceToken::new(token_address, client),
            retry_max_elapsed: None,
            metrics: None,
        }
    }

    pub fn with_retry(mut self, max_elapsed: Duration) -> Self {
        self.retry_max_elapsed = Some(max_elapsed);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GovernanceMonitorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn query_count(&self, voter: Address) -> MonitorResult<u64> {
        self.token
            .num_checkpoints(voter)
            .call()
            .await
            .map(u64::from)
            .map_err(|e| call_error(format!("numCheckpoints({:?})", voter), e))
    }

    async fn query_checkpoint(&self, voter: Address, index: u64) -> MonitorResult<Checkpoint> {
        let index = u32::try_from(index).map_err(|_| {
            MonitorError::Contract(format!("checkpoint index {} exceeds uint32", index))
        })?;
        let (block, power) = self
            .token
            .checkpoints(voter, index)
            .call()
            .await
            .map_err(|e| call_error(format!("checkpoints({:?}, {})", voter, index), e))?;
        Ok(Checkpoint {
            block: u64::from(block),
            power: U256::from(power),
        })
    }

    async fn observe<T, F>(&self, method: &str, fut: F) -> MonitorResult<T>
    where
        F: std::future::Future<Output = MonitorResult<T>>,
    {
        if let Some(metrics) = &self.metrics {
            metrics.oracle_queries.with_label_values(&[method]).inc();
        }
        fut.await.tap_err(|e| {
            tracing::error!("[CheckpointOracle] {} failed: {}", method, e);
            if let Some(metrics) = &self.metrics {
                metrics.oracle_errors.with_label_values(&[method]).inc();
            }
        })
    }
}

// Transport failures may succeed on retry; reverts and decoding failures won't
fn call_error<M: Middleware>(call: String, e: ContractError<M>) -> MonitorError {
    match e {
        ContractError::MiddlewareError { .. } | ContractError::ProviderError { .. } => {
            MonitorError::TransientProvider(format!("{}: {}", call, e))
        }
        _ => MonitorError::Contract(format!("{}: {}", call, e)),
    }
}

#[async_trait]
impl<M: Middleware + 'static> CheckpointOracle for EthCheckpointOracle<M> {
    async fn checkpoint_count(&self, voter: Address) -> MonitorResult<u64> {
        self.observe("numCheckpoints", async {
            match self.retry_max_elapsed {
                Some(max_elapsed) => {
                    retry_with_max_elapsed_time!(self.query_count(voter), max_elapsed)
                        .unwrap_or_else(Err)
                }
                None => self.query_count(voter).await,
            }
        })
        .await
    }

    async fn checkpoint_at(&self, voter: Address, index: u64) -> MonitorResult<Checkpoint> {
        self.observe("checkpoints", async {
            match self.retry_max_elapsed {
                Some(max_elapsed) => retry_with_max_elapsed_time!(
                    self.query_checkpoint(voter, index),
                    max_elapsed
                )
                .unwrap_or_else(Err),
                None => self.query_checkpoint(voter, index).await,
            }
        })
        .await
    }
}
