// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{
    DelegateVotesChangedFilter, ProposalCreatedFilter, VoteCastFilter, DEFAULT_GOVERNOR_ADDRESS,
    DEFAULT_TOKEN_ADDRESS,
};
use crate::config::DetectionConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::oracle::CheckpointOracle;
use crate::types::{Checkpoint, GovernanceTransaction};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::contract::EthEvent;
use ethers::types::{Address, Log, H256, U256};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Mutex;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn governor_address() -> Address {
    Address::from_str(DEFAULT_GOVERNOR_ADDRESS).unwrap()
}

pub fn token_address() -> Address {
    Address::from_str(DEFAULT_TOKEN_ADDRESS).unwrap()
}

pub fn detection_config(before: u64, after: u64, threshold: u64) -> DetectionConfig {
    DetectionConfig::new(before, after, U256::from(threshold))
}

pub fn tx_with_logs(block_number: u64, logs: Vec<Log>) -> GovernanceTransaction {
    GovernanceTransaction::new(H256::random(), block_number, logs)
}

fn log(address: Address, topics: Vec<H256>, tokens: &[Token]) -> Log {
    Log {
        address,
        topics,
        // Note: must use `encode` rather than `encode_packed`
        data: ethers::abi::encode(tokens).into(),
        ..Default::default()
    }
}

pub fn proposal_created_log(
    governor: Address,
    proposal_id: u64,
    start_block: u64,
    end_block: u64,
) -> Log {
    log(
        governor,
        vec![ProposalCreatedFilter::signature()],
        &[
            Token::Uint(U256::from(proposal_id)),
            Token::Address(Address::repeat_byte(0xde)),
            Token::Array(vec![]),
            Token::Array(vec![]),
            Token::Array(vec![]),
            Token::Array(vec![]),
            Token::Uint(U256::from(start_block)),
            Token::Uint(U256::from(end_block)),
            Token::String("Test proposal".to_string()),
        ],
    )
}

pub fn vote_cast_log(
    governor: Address,
    voter: Address,
    proposal_id: u64,
    support: u8,
    votes: u64,
) -> Log {
    log(
        governor,
        vec![VoteCastFilter::signature(), H256::from(voter)],
        &[
            Token::Uint(U256::from(proposal_id)),
            // uint8 is encoded as a full word
            Token::Uint(U256::from(support)),
            Token::Uint(U256::from(votes)),
            Token::String(String::new()),
        ],
    )
}

pub fn delegate_votes_changed_log(
    token: Address,
    delegate: Address,
    previous_balance: u64,
    new_balance: u64,
) -> Log {
    log(
        token,
        vec![DelegateVotesChangedFilter::signature(), H256::from(delegate)],
        &[
            Token::Uint(U256::from(previous_balance)),
            Token::Uint(U256::from(new_balance)),
        ],
    )
}

/// Scripted checkpoint history that records every query it answers.
///
/// Voters without a script have zero checkpoints.
#[derive(Default)]
pub struct MockCheckpointOracle {
    histories: Mutex<HashMap<Address, Vec<Checkpoint>>>,
    failing: Mutex<HashSet<Address>>,
    count_calls: Mutex<Vec<Address>>,
    checkpoint_calls: Mutex<Vec<(Address, u64)>>,
}

impl MockCheckpointOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `voter`'s history, oldest checkpoint first, as `(block, power)`
    pub fn with_history(self, voter: Address, history: &[(u64, u64)]) -> Self {
        self.set_history(voter, history);
        self
    }

    pub fn set_history(&self, voter: Address, history: &[(u64, u64)]) {
        let checkpoints = history
            .iter()
            .map(|(block, power)| Checkpoint {
                block: *block,
                power: U256::from(*power),
            })
            .collect();
        self.histories.lock().unwrap().insert(voter, checkpoints);
    }

    /// Every query about `voter` fails
    pub fn with_failure(self, voter: Address) -> Self {
        self.failing.lock().unwrap().insert(voter);
        self
    }

    pub fn count_calls(&self) -> Vec<Address> {
        self.count_calls.lock().unwrap().clone()
    }

    pub fn checkpoint_calls(&self) -> Vec<(Address, u64)> {
        self.checkpoint_calls.lock().unwrap().clone()
    }

    fn check_failure(&self, voter: Address) -> MonitorResult<()> {
        if self.failing.lock().unwrap().contains(&voter) {
            return Err(MonitorError::Contract(format!(
                "scripted failure for {:?}",
                voter
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointOracle for MockCheckpointOracle {
    async fn checkpoint_count(&self, voter: Address) -> MonitorResult<u64> {
        self.count_calls.lock().unwrap().push(voter);
        self.check_failure(voter)?;
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(&voter)
            .map(|h| h.len() as u64)
            .unwrap_or_default())
    }

    async fn checkpoint_at(&self, voter: Address, index: u64) -> MonitorResult<Checkpoint> {
        self.checkpoint_calls.lock().unwrap().push((voter, index));
        self.check_failure(voter)?;
        self.histories
            .lock()
            .unwrap()
            .get(&voter)
            .and_then(|h| h.get(index as usize).copied())
            .ok_or_else(|| {
                MonitorError::Contract(format!("no checkpoint {} for {:?}", index, voter))
            })
    }
}
