// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Data model shared by the store, the detectors and the output layer.

use ethers::types::{Address, Log, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Chain-assigned proposal identifier.
pub type ProposalId = U256;

/// Name shared by every alert emitted by this monitor.
pub const ALERT_NAME: &str = "Influencing Voter in Governance Proposal";

/// Protocol label used when the config does not set one.
pub const DEFAULT_PROTOCOL: &str = "uniswap";

/// Direction of a cast vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteSupport {
    Against,
    For,
    Abstain,
}

impl From<u8> for VoteSupport {
    // Any value outside 0/1 counts as an abstention
    fn from(support: u8) -> Self {
        match support {
            0 => VoteSupport::Against,
            1 => VoteSupport::For,
            _ => VoteSupport::Abstain,
        }
    }
}

impl fmt::Display for VoteSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteSupport::Against => write!(f, "against"),
            VoteSupport::For => write!(f, "for"),
            VoteSupport::Abstain => write!(f, "abstain"),
        }
    }
}

/// A vote captured for a tracked proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
    /// Voting weight cast
    pub votes: U256,
    pub support: VoteSupport,
    /// Block of the transaction that cast the vote
    pub block_number: u64,
    /// Power gained shortly before the proposal started (first hit only)
    pub increase_before: Option<U256>,
    /// Cumulative power lost after the proposal ended
    pub decrease_after: Option<U256>,
}

impl VoteRecord {
    pub fn new(votes: U256, support: VoteSupport, block_number: u64) -> Self {
        Self {
            votes,
            support,
            block_number,
            increase_before: None,
            decrease_after: None,
        }
    }
}

/// A governance proposal and the votes observed for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub start_block: U256,
    pub end_block: U256,
    /// Voters in first-recorded order
    voters: Vec<Address>,
    votes: HashMap<Address, VoteRecord>,
}

impl Proposal {
    pub fn new(start_block: U256, end_block: U256) -> Self {
        Self {
            start_block,
            end_block,
            voters: Vec::new(),
            votes: HashMap::new(),
        }
    }

    pub fn voters(&self) -> &[Address] {
        &self.voters
    }

    pub fn vote(&self, voter: &Address) -> Option<&VoteRecord> {
        self.votes.get(voter)
    }

    pub(crate) fn vote_mut(&mut self, voter: &Address) -> Option<&mut VoteRecord> {
        self.votes.get_mut(voter)
    }

    /// Insert or replace the vote of `voter`; a replaced vote keeps its position
    pub(crate) fn upsert_vote(&mut self, voter: Address, record: VoteRecord) {
        if self.votes.insert(voter, record).is_none() {
            self.voters.push(voter);
        }
    }

    pub fn vote_count(&self) -> usize {
        self.voters.len()
    }
}

/// Historical voting power snapshot returned by the checkpoint oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Block from which `power` is effective
    pub block: u64,
    pub power: U256,
}

/// All logs emitted by one transaction, in emission order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GovernanceTransaction {
    pub tx_hash: H256,
    pub block_number: u64,
    pub logs: Vec<Log>,
}

impl GovernanceTransaction {
    pub fn new(tx_hash: H256, block_number: u64, logs: Vec<Log>) -> Self {
        Self {
            tx_hash,
            block_number,
            logs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertId {
    /// Vote cast after a power increase inside the pre-voting window
    #[serde(rename = "GOVERNANCE-ALERT-1")]
    IncreaseBeforeVote,
    /// Power decrease after voting ended
    #[serde(rename = "GOVERNANCE-ALERT-2")]
    DecreaseAfterVote,
    /// Both of the above for the same voter and proposal
    #[serde(rename = "GOVERNANCE-ALERT-3")]
    InfluencedProposal,
}

impl AlertId {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertId::IncreaseBeforeVote => "GOVERNANCE-ALERT-1",
            AlertId::DecreaseAfterVote => "GOVERNANCE-ALERT-2",
            AlertId::InfluencedProposal => "GOVERNANCE-ALERT-3",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlertId::IncreaseBeforeVote => Severity::Low,
            AlertId::DecreaseAfterVote => Severity::Medium,
            AlertId::InfluencedProposal => Severity::High,
        }
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    Info,
}

/// Alert metadata; fields are empty when no vote was recorded
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMetadata {
    pub voter: String,
    pub proposal_id: String,
    pub votes_cast_to_proposal: String,
    pub vote_type: String,
    pub vote_cast_at_block: String,
}

impl AlertMetadata {
    pub fn new(proposal_id: ProposalId, voter: Address, record: Option<&VoteRecord>) -> Self {
        Self {
            voter: format_address(&voter),
            proposal_id: proposal_id.to_string(),
            votes_cast_to_proposal: record.map(|r| r.votes.to_string()).unwrap_or_default(),
            vote_type: record.map(|r| r.support.to_string()).unwrap_or_default(),
            vote_cast_at_block: record
                .map(|r| r.block_number.to_string())
                .unwrap_or_default(),
        }
    }
}

/// A detection result ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub name: String,
    pub description: String,
    pub alert_id: AlertId,
    pub protocol: String,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub metadata: AlertMetadata,
}

impl Alert {
    fn new(alert_id: AlertId, description: String, protocol: &str, metadata: AlertMetadata) -> Self {
        Self {
            name: ALERT_NAME.to_string(),
            description,
            alert_id,
            protocol: protocol.to_string(),
            severity: alert_id.severity(),
            alert_type: AlertType::Info,
            metadata,
        }
    }

    pub fn increase_before_vote(
        protocol: &str,
        threshold: U256,
        observation_period_before_voting: u64,
        metadata: AlertMetadata,
    ) -> Self {
        let description = format!(
            "New vote cast to proposal #{} by an user who suffered an increase of voting power greater \
             than {} in the previous {} blocks before the proposal submission.",
            metadata.proposal_id, threshold, observation_period_before_voting
        );
        Self::new(AlertId::IncreaseBeforeVote, description, protocol, metadata)
    }

    pub fn decrease_after_vote(
        protocol: &str,
        threshold: U256,
        observation_period_after_voting: u64,
        metadata: AlertMetadata,
    ) -> Self {
        let description = format!(
            "Voter of proposal #{} suffered a decrease of voting power greater \
             than {} in the following {} blocks after the voting end.",
            metadata.proposal_id, threshold, observation_period_after_voting
        );
        Self::new(AlertId::DecreaseAfterVote, description, protocol, metadata)
    }

    pub fn influenced_proposal(
        protocol: &str,
        threshold: U256,
        observation_period_before_voting: u64,
        observation_period_after_voting: u64,
        metadata: AlertMetadata,
    ) -> Self {
        let description = format!(
            "Proposal has been influenced. Voter of proposal #{} suffered an increase of voting power greater \
             than {} in the previous {} blocks before the voting start \
             and a decrease of voting power greater than {} in the following {} \
             blocks after the voting end.",
            metadata.proposal_id,
            threshold,
            observation_period_before_voting,
            threshold,
            observation_period_after_voting
        );
        Self::new(AlertId::InfluencedProposal, description, protocol, metadata)
    }
}

/// Full lowercase hex, `0x`-prefixed
pub fn format_address(address: &Address) -> String {
    format!("{:?}", address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_support_from_raw() {
        assert_eq!(VoteSupport::from(0), VoteSupport::Against);
        assert_eq!(VoteSupport::from(1), VoteSupport::For);
        assert_eq!(VoteSupport::from(2), VoteSupport::Abstain);
        assert_eq!(VoteSupport::from(7), VoteSupport::Abstain);
        assert_eq!(VoteSupport::Against.to_string(), "against");
    }

    #[test]
    fn test_upsert_vote_keeps_first_position() {
        let mut proposal = Proposal::new(U256::from(10), U256::from(20));
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);

        proposal.upsert_vote(a, VoteRecord::new(U256::from(1), VoteSupport::For, 11));
        proposal.upsert_vote(b, VoteRecord::new(U256::from(2), VoteSupport::For, 12));
        proposal.upsert_vote(a, VoteRecord::new(U256::from(3), VoteSupport::Against, 13));

        assert_eq!(proposal.voters(), &[a, b]);
        assert_eq!(proposal.vote(&a).unwrap().votes, U256::from(3));
        assert_eq!(proposal.vote_count(), 2);
    }

    #[test]
    fn test_metadata_without_vote_record_is_empty() {
        let voter = Address::repeat_byte(0xab);
        let metadata = AlertMetadata::new(U256::from(42), voter, None);
        assert_eq!(metadata.voter, format!("0x{}", "ab".repeat(20)));
        assert_eq!(metadata.proposal_id, "42");
        assert_eq!(metadata.votes_cast_to_proposal, "");
        assert_eq!(metadata.vote_type, "");
        assert_eq!(metadata.vote_cast_at_block, "");
    }

    #[test]
    fn test_alert_json_shape() {
        let record = VoteRecord::new(U256::from(100), VoteSupport::Against, 15);
        let metadata = AlertMetadata::new(U256::from(7), Address::zero(), Some(&record));
        let alert = Alert::decrease_after_vote("uniswap", U256::from(10), 5, metadata);

        assert_eq!(alert.severity, Severity::Medium);
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["alertId"], "GOVERNANCE-ALERT-2");
        assert_eq!(json["severity"], "Medium");
        assert_eq!(json["type"], "Info");
        assert_eq!(json["name"], ALERT_NAME);
        assert_eq!(json["metadata"]["votesCastToProposal"], "100");
        assert_eq!(json["metadata"]["voteType"], "against");
        assert_eq!(json["metadata"]["voteCastAtBlock"], "15");
        assert_eq!(
            json["description"],
            "Voter of proposal #7 suffered a decrease of voting power greater than 10 \
             in the following 5 blocks after the voting end."
        );
    }

    #[test]
    fn test_alert_severity_tiers() {
        assert_eq!(AlertId::IncreaseBeforeVote.severity(), Severity::Low);
        assert_eq!(AlertId::DecreaseAfterVote.severity(), Severity::Medium);
        assert_eq!(AlertId::InfluencedProposal.severity(), Severity::High);
        assert!(Severity::High > Severity::Low);
    }
}
