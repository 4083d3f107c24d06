// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory proposal store
//!
//! Sole owner of the detection state shared by the pipeline stages. It lives
//! for the whole process and is rebuilt from scratch on restart, so only
//! proposals created after startup are ever tracked.

use crate::error::{MonitorError, MonitorResult};
use crate::types::{Proposal, ProposalId, VoteRecord, VoteSupport};
use ethers::types::{Address, U256};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ProposalStore {
    /// Ordered by id so scans are deterministic
    proposals: BTreeMap<ProposalId, Proposal>,
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a proposal with no votes, replacing any proposal with the same id
    pub fn init_proposal(&mut self, id: ProposalId, start_block: U256, end_block: U256) {
        if self
            .proposals
            .insert(id, Proposal::new(start_block, end_block))
            .is_some()
        {
            debug!("[ProposalStore] Proposal #{} re-initialized, votes cleared", id);
        }
    }

    pub fn exists(&self, id: &ProposalId) -> bool {
        self.proposals.contains_key(id)
    }

    pub fn get(&self, id: &ProposalId) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    /// Start block of the proposal, zero if untracked
    pub fn start_block(&self, id: &ProposalId) -> U256 {
        self.get(id).map(|p| p.start_block).unwrap_or_default()
    }

    /// End block of the proposal, zero if untracked
    pub fn end_block(&self, id: &ProposalId) -> U256 {
        self.get(id).map(|p| p.end_block).unwrap_or_default()
    }

    pub fn voters_of(&self, id: &ProposalId) -> Vec<Address> {
        self.get(id)
            .map(|p| p.voters().to_vec())
            .unwrap_or_default()
    }

    pub fn vote_of(&self, id: &ProposalId, voter: &Address) -> Option<&VoteRecord> {
        self.get(id).and_then(|p| p.vote(voter))
    }

    /// Record a vote, replacing any earlier vote of the same voter
    pub fn add_vote(
        &mut self,
        id: ProposalId,
        voter: Address,
        votes: U256,
        support: VoteSupport,
        block_number: u64,
    ) -> MonitorResult<()> {
        let proposal = self
            .proposals
            .get_mut(&id)
            .ok_or(MonitorError::ProposalNotTracked(id))?;
        proposal.upsert_vote(voter, VoteRecord::new(votes, support, block_number));
        Ok(())
    }

    pub fn record_increase_before(
        &mut self,
        id: ProposalId,
        voter: Address,
        amount: U256,
    ) -> MonitorResult<()> {
        self.vote_mut(id, voter)?.increase_before = Some(amount);
        Ok(())
    }

    /// Overwrite the decrease amount; accumulation is up to the caller
    pub fn record_decrease_after(
        &mut self,
        id: ProposalId,
        voter: Address,
        amount: U256,
    ) -> MonitorResult<()> {
        self.vote_mut(id, voter)?.decrease_after = Some(amount);
        Ok(())
    }

    /// Ids of proposals whose end block is strictly greater than `block`,
    /// in ascending id order
    pub fn proposal_ids_with_end_block_greater_than(&self, block: U256) -> Vec<ProposalId> {
        self.proposals
            .iter()
            .filter(|(_, p)| p.end_block > block)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every tracked proposal id, in ascending order
    pub fn proposal_ids(&self) -> Vec<ProposalId> {
        self.proposals.keys().copied().collect()
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }

    pub fn vote_count(&self) -> usize {
        self.proposals.values().map(|p| p.vote_count()).sum()
    }

    fn vote_mut(&mut self, id: ProposalId, voter: Address) -> MonitorResult<&mut VoteRecord> {
        self.proposals
            .get_mut(&id)
            .ok_or(MonitorError::ProposalNotTracked(id))?
            .vote_mut(&voter)
            .ok_or(MonitorError::VoteNotRecorded {
                proposal_id: id,
                voter,
            })
    }
}
