// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Polls the governor and token contracts for logs and feeds them to the
//! pipeline one transaction at a time, in chain order.
//!
//! Reorgs are not handled: a block is never revisited once its logs were
//! delivered.

use crate::config::ValidatedConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::metrics::GovernanceMonitorMetrics;
use crate::retry_with_max_elapsed_time;
use crate::types::GovernanceTransaction;
use ethers::providers::Middleware;
use ethers::types::{Address, Filter, Log};
use std::sync::Arc;
use tap::TapFallible;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_MAX_RETRY_DURATION: Duration = Duration::from_secs(30);

pub struct GovernanceLogSyncer<M> {
    provider: Arc<M>,
    addresses: Vec<Address>,
    start_block: Option<u64>,
    poll_interval: Duration,
    max_block_range: u64,
    channel_size: usize,
    max_retry_duration: Duration,
    metrics: Option<Arc<GovernanceMonitorMetrics>>,
}

impl<M: Middleware + 'static> GovernanceLogSyncer<M> {
    pub fn new(provider: Arc<M>, addresses: Vec<Address>) -> Self {
        Self {
            provider,
            addresses,
            start_block: None,
            poll_interval: Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS),
            max_block_range: crate::config::DEFAULT_MAX_BLOCK_RANGE,
            channel_size: crate::config::DEFAULT_CHANNEL_SIZE,
            max_retry_duration: DEFAULT_MAX_RETRY_DURATION,
            metrics: None,
        }
    }

    pub fn from_config(provider: Arc<M>, config: &ValidatedConfig) -> Self {
        let mut syncer = Self::new(
            provider,
            vec![config.governor_address, config.token_address],
        )
        .with_poll_interval(config.poll_interval)
        .with_max_block_range(config.max_block_range)
        .with_channel_size(config.channel_size);
        if let Some(start_block) = config.start_block {
            syncer = syncer.with_start_block(start_block);
        }
        syncer
    }

    pub fn with_start_block(mut self, start_block: u64) -> Self {
        self.start_block = Some(start_block);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range.max(1);
        self
    }

    pub fn with_channel_size(mut self, channel_size: usize) -> Self {
        self.channel_size = channel_size.max(1);
        self
    }

    pub fn with_max_retry_duration(mut self, max_retry_duration: Duration) -> Self {
        self.max_retry_duration = max_retry_duration;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GovernanceMonitorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start polling. Transactions arrive on the returned receiver until
    /// `cancel` fires or the receiver is dropped.
    pub async fn run(
        self,
        cancel: CancellationToken,
    ) -> MonitorResult<(JoinHandle<()>, mpsc::Receiver<GovernanceTransaction>)> {
        let cursor = match self.start_block {
            Some(block) => block,
            None => self.latest_block_with_retry().await?,
        };
        info!(
            "[Syncer] Starting from block {} for contracts {:?}",
            cursor, self.addresses
        );

        let (tx_sender, tx_receiver) = mpsc::channel(self.channel_size);
        let handle = tokio::spawn(async move {
            self.run_loop(cursor, tx_sender, cancel).await;
        });
        Ok((handle, tx_receiver))
    }

    async fn run_loop(
        self,
        mut cursor: u64,
        sender: mpsc::Sender<GovernanceTransaction>,
        cancel: CancellationToken,
    ) {
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Syncer] Cancelled at block {}", cursor);
                    break;
                }
                _ = interval.tick() => {
                    match self.catch_up(&mut cursor, &sender, &cancel).await {
                        Ok(()) => {}
                        Err(MonitorError::ChannelClosed) => {
                            info!("[Syncer] Receiver dropped, stopping");
                            break;
                        }
                        // Retry from the same cursor on the next tick
                        Err(e) if e.is_transient() => {
                            warn!("[Syncer] Sync from block {} failed, will retry: {}", cursor, e);
                        }
                        Err(e) => {
                            error!("[Syncer] Sync from block {} failed: {}", cursor, e);
                        }
                    }
                }
            }
        }
    }

    /// Deliver every block from `cursor` up to the chain head. `cursor` moves
    /// past each chunk once the chunk is sent.
    async fn catch_up(
        &self,
        cursor: &mut u64,
        sender: &mpsc::Sender<GovernanceTransaction>,
        cancel: &CancellationToken,
    ) -> MonitorResult<()> {
        let latest = self.latest_block_with_retry().await?;
        while *cursor <= latest && !cancel.is_cancelled() {
            let start = *cursor;
            let end = latest.min(start.saturating_add(self.max_block_range - 1));
            let transactions = retry_with_max_elapsed_time!(
                self.fetch_transactions(start, end),
                self.max_retry_duration
            )
            .unwrap_or_else(Err)?;
            debug!(
                "[Syncer] Blocks {}..={} yielded {} transactions",
                start,
                end,
                transactions.len()
            );
            for transaction in transactions {
                sender
                    .send(transaction)
                    .await
                    .map_err(|_| MonitorError::ChannelClosed)?;
            }
            if let Some(metrics) = &self.metrics {
                metrics.last_synced_block.set(end as i64);
            }
            *cursor = end + 1;
        }
        Ok(())
    }

    async fn latest_block_with_retry(&self) -> MonitorResult<u64> {
        retry_with_max_elapsed_time!(self.latest_block(), self.max_retry_duration)
            .unwrap_or_else(Err)
    }

    pub async fn latest_block(&self) -> MonitorResult<u64> {
        self.observe_query("get_block_number");
        let block = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| MonitorError::Provider(e.to_string()))?;
        Ok(block.as_u64())
    }

    /// Logs of the watched contracts in `[from, to]`, grouped per transaction
    pub async fn fetch_transactions(
        &self,
        from: u64,
        to: u64,
    ) -> MonitorResult<Vec<GovernanceTransaction>> {
        self.observe_query("get_logs");
        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .address(self.addresses.clone());
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| MonitorError::Provider(e.to_string()))
            .tap_err(|e| {
                error!(
                    "[Syncer] get_logs failed. Filter: {:?}. Error {:?}",
                    filter, e
                )
            })?;
        group_logs_by_transaction(logs)
    }

    fn observe_query(&self, query: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.eth_rpc_queries.with_label_values(&[query]).inc();
        }
    }
}

/// Group logs into transactions ordered by block and position in block.
/// Logs keep their emission order inside a transaction.
pub fn group_logs_by_transaction(logs: Vec<Log>) -> MonitorResult<Vec<GovernanceTransaction>> {
    let mut keyed = logs
        .into_iter()
        .map(|log| -> MonitorResult<_> {
            let block_number = log
                .block_number
                .ok_or(MonitorError::Provider(
                    "Provider returns log without block_number".into(),
                ))?
                .as_u64();
            let tx_hash = log.transaction_hash.ok_or(MonitorError::Provider(
                "Provider returns log without transaction_hash".into(),
            ))?;
            let tx_index = log.transaction_index.map(|i| i.as_u64()).unwrap_or_default();
            let log_index = log.log_index.map(|i| i.low_u64()).unwrap_or_default();
            Ok(((block_number, tx_index, tx_hash, log_index), log))
        })
        .collect::<MonitorResult<Vec<_>>>()?;
    keyed.sort_by_key(|(key, _)| *key);

    let mut transactions: Vec<GovernanceTransaction> = Vec::new();
    for ((block_number, _, tx_hash, _), log) in keyed {
        match transactions.last_mut() {
            Some(last) if last.tx_hash == tx_hash => last.logs.push(log),
            _ => transactions.push(GovernanceTransaction::new(tx_hash, block_number, vec![log])),
        }
    }
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{governor_address, token_address};
    use ethers::providers::{JsonRpcError, MockResponse, Provider};
    use ethers::types::{H256, U256, U64};

    fn tx_hashes(transactions: &[GovernanceTransaction]) -> Vec<H256> {
        transactions.iter().map(|t| t.tx_hash).collect()
    }

    fn located_log(block: u64, tx_index: u64, log_index: u64, tx_hash: H256) -> Log {
        Log {
            address: governor_address(),
            block_number: Some(U64::from(block)),
            transaction_index: Some(U64::from(tx_index)),
            log_index: Some(U256::from(log_index)),
            transaction_hash: Some(tx_hash),
            ..Default::default()
        }
    }

    #[test]
    fn test_group_logs_orders_transactions_and_keeps_log_order() {
        let (a, b, c) = (H256::repeat_byte(0xa), H256::repeat_byte(0xb), H256::repeat_byte(0xc));
        let logs = vec![
            located_log(11, 0, 0, c),
            located_log(10, 3, 7, b),
            located_log(10, 1, 2, a),
            located_log(10, 3, 5, b),
            located_log(10, 1, 3, a),
        ];

        let transactions = group_logs_by_transaction(logs).unwrap();
        assert_eq!(tx_hashes(&transactions), vec![a, b, c]);
        assert_eq!(transactions[0].block_number, 10);
        assert_eq!(transactions[2].block_number, 11);
        let b_log_indexes: Vec<Option<U256>> =
            transactions[1].logs.iter().map(|l| l.log_index).collect();
        assert_eq!(
            b_log_indexes,
            vec![Some(U256::from(5)), Some(U256::from(7))]
        );
    }

    #[test]
    fn test_group_logs_rejects_unlocated_logs() {
        let mut log = located_log(10, 0, 0, H256::zero());
        log.block_number = None;
        let err = group_logs_by_transaction(vec![log]).unwrap_err();
        assert_eq!(
            err,
            MonitorError::Provider("Provider returns log without block_number".into())
        );

        let mut log = located_log(10, 0, 0, H256::zero());
        log.transaction_hash = None;
        assert!(group_logs_by_transaction(vec![log]).is_err());
        assert!(group_logs_by_transaction(vec![]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_block() {
        let (provider, mock) = Provider::mocked();
        mock.push::<U64, _>(U64::from(17_000_000u64)).unwrap();
        let metrics = Arc::new(GovernanceMonitorMetrics::new_for_testing());
        let syncer = GovernanceLogSyncer::new(Arc::new(provider), vec![governor_address()])
            .with_metrics(metrics.clone());
        assert_eq!(syncer.latest_block().await.unwrap(), 17_000_000);
        assert_eq!(
            metrics
                .eth_rpc_queries
                .with_label_values(&["get_block_number"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_fetch_transactions_groups_logs() {
        let (provider, mock) = Provider::mocked();
        let tx_hash = H256::repeat_byte(0x11);
        mock.push::<Vec<Log>, _>(vec![
            located_log(5, 0, 1, tx_hash),
            located_log(5, 0, 0, tx_hash),
        ])
        .unwrap();
        let syncer = GovernanceLogSyncer::new(
            Arc::new(provider),
            vec![governor_address(), token_address()],
        );

        let transactions = syncer.fetch_transactions(1, 10).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].tx_hash, tx_hash);
        assert_eq!(transactions[0].logs.len(), 2);
        assert_eq!(transactions[0].logs[0].log_index, Some(U256::zero()));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_provider_error() {
        let (provider, _mock) = Provider::mocked();
        let syncer = GovernanceLogSyncer::new(Arc::new(provider), vec![governor_address()]);
        let err = syncer.fetch_transactions(1, 10).await.unwrap_err();
        assert!(matches!(err, MonitorError::Provider(_)));
    }

    #[tokio::test]
    async fn test_cancelled_syncer_stops() {
        let (provider, _mock) = Provider::mocked();
        let syncer = GovernanceLogSyncer::new(Arc::new(provider), vec![governor_address()])
            .with_start_block(100)
            .with_poll_interval(Duration::from_secs(3600))
            .with_max_retry_duration(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (handle, mut receiver) = syncer.run(cancel.clone()).await.unwrap();
        handle.await.unwrap();
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_redeliver_sent_chunks() {
        let (provider, mock) = Provider::mocked();
        let (a, b) = (H256::repeat_byte(0xa), H256::repeat_byte(0xb));
        // MockProvider is LIFO: responses are pushed in reverse consumption order.
        // Second tick resumes at block 2
        mock.push::<Vec<Log>, _>(vec![located_log(2, 0, 0, b)])
            .unwrap();
        mock.push::<U64, _>(U64::from(2)).unwrap();
        // First tick: block 1 is delivered, block 2 fails
        mock.push_response(MockResponse::Error(JsonRpcError {
            code: -32000,
            message: "query timeout".into(),
            data: None,
        }));
        mock.push::<Vec<Log>, _>(vec![located_log(1, 0, 0, a)])
            .unwrap();
        mock.push::<U64, _>(U64::from(2)).unwrap();

        let metrics = Arc::new(GovernanceMonitorMetrics::new_for_testing());
        let syncer = GovernanceLogSyncer::new(Arc::new(provider), vec![governor_address()])
            .with_start_block(1)
            .with_max_block_range(1)
            .with_poll_interval(Duration::from_millis(10))
            .with_max_retry_duration(Duration::from_millis(1))
            .with_metrics(metrics.clone());
        let cancel = CancellationToken::new();
        let (handle, mut receiver) = syncer.run(cancel.clone()).await.unwrap();

        let mut delivered = vec![];
        for _ in 0..2 {
            let tx = time::timeout(Duration::from_secs(5), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            delivered.push(tx.tx_hash);
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(delivered, vec![a, b]);
        assert!(receiver.try_recv().is_err());
        assert_eq!(metrics.last_synced_block.get(), 2);
    }
}
