// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{filter_logs, ProposalCreatedFilter};
use crate::error::MonitorResult;
use crate::pipeline::PipelineStage;
use crate::store::ProposalStore;
use crate::types::{Alert, GovernanceTransaction};
use async_trait::async_trait;
use ethers::types::Address;
use tracing::info;

/// Registers every proposal created on the governor. Never alerts.
pub struct StartVotingIngestor {
    governor: Address,
}

impl StartVotingIngestor {
    pub fn new(governor: Address) -> Self {
        Self { governor }
    }
}

#[async_trait]
impl PipelineStage for StartVotingIngestor {
    fn name(&self) -> &'static str {
        "StartVoting"
    }

    async fn process(
        &self,
        tx: &GovernanceTransaction,
        store: &mut ProposalStore,
    ) -> MonitorResult<Vec<Alert>> {
        for event in filter_logs::<ProposalCreatedFilter>(tx, self.governor) {
            info!(
                "[StartVoting] Tracking proposal #{} (blocks {}..{}) from tx {:?}",
                event.id, event.start_block, event.end_block, tx.tx_hash
            );
            store.init_proposal(event.id, event.start_block, event.end_block);
        }
        Ok(vec![])
    }
}
