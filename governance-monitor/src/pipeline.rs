// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::DetectionConfig;
use crate::detectors::{CastVoteCorrelator, EndVotingCorrelator, StartVotingIngestor};
use crate::error::MonitorResult;
use crate::metrics::GovernanceMonitorMetrics;
use crate::oracle::CheckpointOracle;
use crate::store::ProposalStore;
use crate::types::{Alert, GovernanceTransaction};
use async_trait::async_trait;
use ethers::types::Address;
use std::sync::Arc;
use tap::TapFallible;
use tracing::{debug, error};

/// One step of per-transaction processing.
///
/// Stages get exclusive access to the store for the duration of a call.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        tx: &GovernanceTransaction,
        store: &mut ProposalStore,
    ) -> MonitorResult<Vec<Alert>>;
}

/// Runs every registered stage over each transaction, in registration order.
pub struct GovernancePipeline {
    stages: Vec<Box<dyn PipelineStage>>,
    store: ProposalStore,
    metrics: Option<Arc<GovernanceMonitorMetrics>>,
}

impl GovernancePipeline {
    pub fn new(store: ProposalStore) -> Self {
        Self {
            stages: Vec::new(),
            store,
            metrics: None,
        }
    }

    /// Pipeline with the three governance stages registered
    pub fn for_governor(
        governor: Address,
        token: Address,
        oracle: Arc<dyn CheckpointOracle>,
        detection: DetectionConfig,
        protocol: &str,
    ) -> Self {
        Self::new(ProposalStore::new())
            .with_stage(Box::new(StartVotingIngestor::new(governor)))
            .with_stage(Box::new(CastVoteCorrelator::new(
                governor,
                oracle,
                detection.clone(),
                protocol,
            )))
            .with_stage(Box::new(EndVotingCorrelator::new(
                token, detection, protocol,
            )))
    }

    pub fn with_stage(mut self, stage: Box<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GovernanceMonitorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn store(&self) -> &ProposalStore {
        &self.store
    }

    /// Process one transaction and return the alerts of all stages, in stage
    /// order. A failing stage stops the remaining ones; store updates made
    /// before the failure are kept.
    pub async fn handle_transaction(
        &mut self,
        tx: &GovernanceTransaction,
    ) -> MonitorResult<Vec<Alert>> {
        let mut alerts = Vec::new();
        for stage in &self.stages {
            let timer = self.metrics.as_ref().map(|m| {
                m.stage_latency
                    .with_label_values(&[stage.name()])
                    .start_timer()
            });
            let stage_alerts = stage
                .process(tx, &mut self.store)
                .await
                .tap_err(|e| {
                    error!(
                        "[Pipeline] Stage {} failed on tx {:?} at block {}: {}",
                        stage.name(),
                        tx.tx_hash,
                        tx.block_number,
                        e
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics
                            .stage_errors
                            .with_label_values(&[stage.name(), e.error_type()])
                            .inc();
                    }
                })?;
            drop(timer);
            alerts.extend(stage_alerts);
        }

        debug!(
            "[Pipeline] tx {:?} at block {} produced {} alerts",
            tx.tx_hash,
            tx.block_number,
            alerts.len()
        );
        if let Some(metrics) = &self.metrics {
            metrics.processed_transactions.inc();
            for alert in &alerts {
                metrics
                    .alerts_emitted
                    .with_label_values(&[alert.alert_id.as_str()])
                    .inc();
            }
            metrics
                .tracked_proposals
                .set(self.store.proposal_count() as i64);
            metrics.tracked_votes.set(self.store.vote_count() as i64);
        }
        Ok(alerts)
    }
}
