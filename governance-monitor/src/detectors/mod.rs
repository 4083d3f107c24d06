// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pipeline stages that turn governance logs into store updates and alerts.
//!
//! Stages run in a fixed order per transaction and talk to each other only
//! through the [`ProposalStore`](crate::store::ProposalStore):
//!
//! 1. [`StartVotingIngestor`] registers proposals from `ProposalCreated`.
//! 2. [`CastVoteCorrelator`] records votes from `VoteCast` and looks for a
//!    power increase shortly before the proposal started (ALERT-1).
//! 3. [`EndVotingCorrelator`] tracks power decreases from
//!    `DelegateVotesChanged` after voting ended (ALERT-2, or ALERT-3 when the
//!    voter was already flagged by step 2).

mod cast_vote;
mod end_voting;
mod start_voting;

pub use cast_vote::CastVoteCorrelator;
pub use end_voting::EndVotingCorrelator;
pub use start_voting::StartVotingIngestor;
