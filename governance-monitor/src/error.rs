// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::ProposalId;
use ethers::types::Address;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    // Store mutation on a proposal that was never ingested
    #[error("Proposal #{0} is not tracked")]
    ProposalNotTracked(ProposalId),
    // Store mutation on a voter without a recorded vote
    #[error("No vote recorded for voter {voter:?} on proposal #{proposal_id}")]
    VoteNotRecorded {
        proposal_id: ProposalId,
        voter: Address,
    },
    // Contract call (checkpoint oracle) failed
    #[error("Contract call failed: {0}")]
    Contract(String),
    // Transient Ethereum provider error
    #[error("Transient provider error: {0}")]
    TransientProvider(String),
    // Ethereum provider error or malformed provider response
    #[error("Provider error: {0}")]
    Provider(String),
    // Downstream channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

impl MonitorError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            MonitorError::ProposalNotTracked(_) => "proposal_not_tracked",
            MonitorError::VoteNotRecorded { .. } => "vote_not_recorded",
            MonitorError::Contract(_) => "contract_error",
            MonitorError::TransientProvider(_) => "transient_provider_error",
            MonitorError::Provider(_) => "provider_error",
            MonitorError::ChannelClosed => "channel_closed",
        }
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonitorError::TransientProvider(_) | MonitorError::Provider(_)
        )
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
