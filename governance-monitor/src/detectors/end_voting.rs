// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{filter_logs, DelegateVotesChangedFilter};
use crate::config::DetectionConfig;
use crate::error::MonitorResult;
use crate::pipeline::PipelineStage;
use crate::store::ProposalStore;
use crate::types::{Alert, AlertMetadata, GovernanceTransaction};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use tracing::{debug, warn};

/// Accumulates voting power lost by voters after their proposal ended.
///
/// Every qualifying change re-alerts; nothing is deduplicated here.
pub struct EndVotingCorrelator {
    token: Address,
    detection: DetectionConfig,
    protocol: String,
}

impl EndVotingCorrelator {
    pub fn new(token: Address, detection: DetectionConfig, protocol: &str) -> Self {
        Self {
            token,
            detection,
            protocol: protocol.to_string(),
        }
    }

    fn observed_proposals(&self, store: &ProposalStore, block_number: u64) -> Vec<U256> {
        match block_number.checked_sub(self.detection.observation_period_after_voting) {
            Some(lower_bound) => {
                store.proposal_ids_with_end_block_greater_than(U256::from(lower_bound))
            }
            // The window reaches below block zero
            None => store.proposal_ids(),
        }
    }
}

#[async_trait]
impl PipelineStage for EndVotingCorrelator {
    fn name(&self) -> &'static str {
        "EndVoting"
    }

    async fn process(
        &self,
        tx: &GovernanceTransaction,
        store: &mut ProposalStore,
    ) -> MonitorResult<Vec<Alert>> {
        let changes: Vec<DelegateVotesChangedFilter> = filter_logs(tx, self.token);
        if changes.is_empty() {
            return Ok(vec![]);
        }

        let proposals = self.observed_proposals(store, tx.block_number);
        let threshold = self.detection.voting_power_change_threshold;
        let mut alerts = vec![];
        for proposal_id in proposals {
            let voters = store.voters_of(&proposal_id);
            for change in &changes {
                if !voters.contains(&change.delegate) {
                    continue;
                }
                let Some(decrease) = change
                    .previous_balance
                    .checked_sub(change.new_balance)
                    .filter(|d| !d.is_zero())
                else {
                    continue;
                };

                let total = match store
                    .vote_of(&proposal_id, &change.delegate)
                    .and_then(|v| v.decrease_after)
                {
                    Some(already) => already.saturating_add(decrease),
                    None => decrease,
                };
                store.record_decrease_after(proposal_id, change.delegate, total)?;
                debug!(
                    "[EndVoting] Voter {:?} of proposal #{} lost {} voting power, {} in total",
                    change.delegate, proposal_id, decrease, total
                );
                if total <= threshold {
                    continue;
                }

                let vote = store.vote_of(&proposal_id, &change.delegate);
                let increased_before = vote.and_then(|v| v.increase_before).is_some();
                let metadata = AlertMetadata::new(proposal_id, change.delegate, vote);
                let alert = if increased_before {
                    Alert::influenced_proposal(
                        &self.protocol,
                        threshold,
                        self.detection.observation_period_before_voting,
                        self.detection.observation_period_after_voting,
                        metadata,
                    )
                } else {
                    Alert::decrease_after_vote(
                        &self.protocol,
                        threshold,
                        self.detection.observation_period_after_voting,
                        metadata,
                    )
                };
                warn!(
                    "[EndVoting] {}: voter {:?} of proposal #{} lost {} voting power after the voting end",
                    alert.alert_id, change.delegate, proposal_id, total
                );
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }
}
