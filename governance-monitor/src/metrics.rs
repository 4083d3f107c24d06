// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

pub const METRICS_PATH: &str = "/metrics";

const STAGE_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10., 30., 60.,
];

#[derive(Clone, Debug)]
pub struct GovernanceMonitorMetrics {
    pub(crate) processed_transactions: IntCounter,
    pub(crate) alerts_emitted: IntCounterVec,
    pub(crate) oracle_queries: IntCounterVec,
    pub(crate) oracle_errors: IntCounterVec,
    pub(crate) stage_errors: IntCounterVec,
    pub(crate) stage_latency: HistogramVec,
    pub(crate) tracked_proposals: IntGauge,
    pub(crate) tracked_votes: IntGauge,
    pub(crate) last_synced_block: IntGauge,
    pub(crate) eth_rpc_queries: IntCounterVec,
}

impl GovernanceMonitorMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            processed_transactions: register_int_counter_with_registry!(
                "governance_monitor_processed_transactions",
                "Total number of transactions run through the detection pipeline",
                registry,
            )
            .unwrap(),
            alerts_emitted: register_int_counter_vec_with_registry!(
                "governance_monitor_alerts_emitted",
                "Total number of alerts emitted, by alert id",
                &["alert_id"],
                registry,
            )
            .unwrap(),
            oracle_queries: register_int_counter_vec_with_registry!(
                "governance_monitor_oracle_queries",
                "Total number of checkpoint queries issued to the token contract, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            oracle_errors: register_int_counter_vec_with_registry!(
                "governance_monitor_oracle_errors",
                "Total number of failed checkpoint queries, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            stage_errors: register_int_counter_vec_with_registry!(
                "governance_monitor_stage_errors",
                "Total number of pipeline stage failures, by stage and error type",
                &["stage", "error_type"],
                registry,
            )
            .unwrap(),
            stage_latency: register_histogram_vec_with_registry!(
                "governance_monitor_stage_latency",
                "Latency of a pipeline stage per transaction, by stage",
                &["stage"],
                STAGE_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            tracked_proposals: register_int_gauge_with_registry!(
                "governance_monitor_tracked_proposals",
                "Number of proposals currently held in the store",
                registry,
            )
            .unwrap(),
            tracked_votes: register_int_gauge_with_registry!(
                "governance_monitor_tracked_votes",
                "Number of votes currently held in the store",
                registry,
            )
            .unwrap(),
            last_synced_block: register_int_gauge_with_registry!(
                "governance_monitor_last_synced_block",
                "Last block whose logs were delivered to the pipeline",
                registry,
            )
            .unwrap(),
            eth_rpc_queries: register_int_counter_vec_with_registry!(
                "governance_monitor_eth_rpc_queries",
                "Total number of queries issued to eth provider by the log syncer, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

/// Text exposition of every metric in `registry`
pub fn render_metrics(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

async fn metrics_handler(State(registry): State<Registry>) -> (StatusCode, String) {
    match render_metrics(&registry) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unable to encode metrics: {}", e),
        ),
    }
}

pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(registry)
}

/// Serve `registry` on `address` until the process exits
pub fn start_metrics_server(
    address: SocketAddr,
    registry: Registry,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("[Metrics] Failed to bind {}: {}", address, e);
                return;
            }
        };
        info!("[Metrics] Serving {} on {}", METRICS_PATH, address);
        if let Err(e) = axum::serve(listener, metrics_router(registry).into_make_service()).await {
            error!("[Metrics] Server stopped: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once_per_registry() {
        let registry = Registry::new();
        let metrics = GovernanceMonitorMetrics::new(&registry);
        metrics
            .alerts_emitted
            .with_label_values(&["GOVERNANCE-ALERT-1"])
            .inc();
        metrics.processed_transactions.inc();

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "governance_monitor_alerts_emitted"));
        assert_eq!(metrics.processed_transactions.get(), 1);
    }

    #[test]
    fn test_render_metrics_text() {
        let registry = Registry::new();
        let metrics = GovernanceMonitorMetrics::new(&registry);
        metrics.last_synced_block.set(17_000_000);
        let body = render_metrics(&registry).unwrap();
        assert!(body.contains("governance_monitor_last_synced_block 17000000"));
    }

    #[tokio::test]
    async fn test_metrics_server_serves_registry() {
        let registry = Registry::new();
        let metrics = GovernanceMonitorMetrics::new(&registry);
        metrics.tracked_proposals.set(3);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, metrics_router(registry).into_make_service())
                .await
                .unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("governance_monitor_tracked_proposals 3"));
    }

    #[test]
    #[should_panic]
    fn test_duplicate_registration_panics() {
        let registry = Registry::new();
        let _first = GovernanceMonitorMetrics::new(&registry);
        let _second = GovernanceMonitorMetrics::new(&registry);
    }
}
