// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract bindings for the governor and its voting token.

#![allow(clippy::too_many_arguments)]

use crate::types::GovernanceTransaction;
use ethers::contract::{abigen, EthLogDecode};
use ethers::types::Address;

/// GovernorBravo deployment watched by default
pub const DEFAULT_GOVERNOR_ADDRESS: &str = "0x408ED6354d4973f66138C91495F2f2FCbd8724C3";

/// UNI token deployment watched by default
pub const DEFAULT_TOKEN_ADDRESS: &str = "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984";

abigen!(
    GovernorBravo,
    r#"[
        event ProposalCreated(uint256 id, address proposer, address[] targets, uint256[] values, string[] signatures, bytes[] calldatas, uint256 startBlock, uint256 endBlock, string description)
        event VoteCast(address indexed voter, uint256 proposalId, uint8 support, uint256 votes, string reason)
    ]"#
);

abigen!(
    GovernanceToken,
    r#"[
        event DelegateVotesChanged(address indexed delegate, uint256 previousBalance, uint256 newBalance)
        function checkpoints(address account, uint32 index) external view returns (uint32, uint96)
        function numCheckpoints(address account) external view returns (uint32)
    ]"#
);

/// Decode every log of `tx` emitted by `address` as event `E`, in log order.
///
/// Logs of other events (or from other contracts) are skipped.
pub fn filter_logs<E: EthLogDecode>(tx: &GovernanceTransaction, address: Address) -> Vec<E> {
    tx.logs
        .iter()
        .filter(|log| log.address == address)
        .filter_map(|log| ethers::contract::parse_log::<E>(log.clone()).ok())
        .collect()
}
