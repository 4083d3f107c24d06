// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{filter_logs, VoteCastFilter};
use crate::config::DetectionConfig;
use crate::error::MonitorResult;
use crate::oracle::CheckpointOracle;
use crate::pipeline::PipelineStage;
use crate::store::ProposalStore;
use crate::types::{Alert, AlertMetadata, GovernanceTransaction, VoteSupport};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records votes on tracked proposals and flags voters whose power rose by
/// more than the threshold shortly before the proposal started.
pub struct CastVoteCorrelator {
    governor: Address,
    oracle: Arc<dyn CheckpointOracle>,
    detection: DetectionConfig,
    protocol: String,
}

impl CastVoteCorrelator {
    pub fn new(
        governor: Address,
        oracle: Arc<dyn CheckpointOracle>,
        detection: DetectionConfig,
        protocol: &str,
    ) -> Self {
        Self {
            governor,
            oracle,
            detection,
            protocol: protocol.to_string(),
        }
    }

    // A checkpoint at or after the start block is always inside the window
    fn in_observation_period(&self, start_block: U256, checkpoint_block: u64) -> bool {
        let checkpoint_block = U256::from(checkpoint_block);
        checkpoint_block >= start_block
            || start_block - checkpoint_block
                < U256::from(self.detection.observation_period_before_voting)
    }

    /// Walk the voter's checkpoints from newest to oldest and return the
    /// power gained since the first checkpoint whose power is more than the
    /// threshold below the latest one. The walk stops once it leaves the
    /// observation period.
    async fn find_increase_before(
        &self,
        voter: Address,
        start_block: U256,
        count: u64,
    ) -> MonitorResult<Option<U256>> {
        let last_index = count - 1;
        let latest = self.oracle.checkpoint_at(voter, last_index).await?;
        if !self.in_observation_period(start_block, latest.block) {
            debug!(
                "[CastVote] Latest checkpoint of {:?} at block {} is outside the observation period",
                voter, latest.block
            );
            return Ok(None);
        }

        for index in (0..last_index).rev() {
            let checkpoint = self.oracle.checkpoint_at(voter, index).await?;
            let increase = latest
                .power
                .checked_sub(checkpoint.power)
                .filter(|delta| *delta > self.detection.voting_power_change_threshold);
            if increase.is_some() {
                return Ok(increase);
            }
            if !self.in_observation_period(start_block, checkpoint.block) {
                break;
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl PipelineStage for CastVoteCorrelator {
    fn name(&self) -> &'static str {
        "CastVote"
    }

    async fn process(
        &self,
        tx: &GovernanceTransaction,
        store: &mut ProposalStore,
    ) -> MonitorResult<Vec<Alert>> {
        let votes: Vec<VoteCastFilter> = filter_logs(tx, self.governor);
        if votes.is_empty() {
            return Ok(vec![]);
        }

        // Counts are fetched for every vote, tracked or not
        let counts = try_join_all(
            votes
                .iter()
                .map(|vote| self.oracle.checkpoint_count(vote.voter)),
        )
        .await?;

        let mut alerts = vec![];
        for (vote, count) in votes.iter().zip(counts) {
            if !store.exists(&vote.proposal_id) {
                debug!(
                    "[CastVote] Vote of {:?} on untracked proposal #{}, skipping",
                    vote.voter, vote.proposal_id
                );
                continue;
            }
            if count == 0 {
                debug!(
                    "[CastVote] Voter {:?} has no checkpoints, skipping",
                    vote.voter
                );
                continue;
            }

            let support = VoteSupport::from(vote.support);
            store.add_vote(
                vote.proposal_id,
                vote.voter,
                vote.votes,
                support,
                tx.block_number,
            )?;
            info!(
                "[CastVote] Recorded {} vote of {:?} with {} votes on proposal #{} at block {}",
                support, vote.voter, vote.votes, vote.proposal_id, tx.block_number
            );

            let start_block = store.start_block(&vote.proposal_id);
            let Some(increase) = self
                .find_increase_before(vote.voter, start_block, count)
                .await?
            else {
                continue;
            };

            store.record_increase_before(vote.proposal_id, vote.voter, increase)?;
            let metadata = AlertMetadata::new(
                vote.proposal_id,
                vote.voter,
                store.vote_of(&vote.proposal_id, &vote.voter),
            );
            let alert = Alert::increase_before_vote(
                &self.protocol,
                self.detection.voting_power_change_threshold,
                self.detection.observation_period_before_voting,
                metadata,
            );
            warn!(
                "[CastVote] {}: voter {:?} gained {} voting power before proposal #{}",
                alert.alert_id, vote.voter, increase, vote.proposal_id
            );
            alerts.push(alert);
        }
        Ok(alerts)
    }
}
