// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use clap::Parser;
use ethers::providers::{Http, Provider};
use governance_monitor::config::GovernanceMonitorConfig;
use governance_monitor::metrics::{start_metrics_server, GovernanceMonitorMetrics};
use governance_monitor::oracle::EthCheckpointOracle;
use governance_monitor::pipeline::GovernancePipeline;
use governance_monitor::syncer::GovernanceLogSyncer;
use governance_monitor::types::Alert;
use governance_monitor_config::Config;
use prometheus::Registry;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version)]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
    /// Overrides eth-rpc-url from the config file
    #[clap(long, env = "GOVERNANCE_MONITOR_ETH_RPC_URL")]
    pub eth_rpc_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = GovernanceMonitorConfig::load(&args.config_path)
        .with_context(|| format!("Failed to load config from {:?}", args.config_path))?;
    if let Some(url) = args.eth_rpc_url {
        config.eth_rpc_url = url;
    }
    let config = config.validate()?;

    let registry = Registry::new();
    let metrics = Arc::new(GovernanceMonitorMetrics::new(&registry));
    let metrics_address =
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), config.metrics_port);
    let _metrics_handle = start_metrics_server(metrics_address, registry);

    let provider = Arc::new(Provider::new(Http::new(config.eth_rpc_url.clone())));

    let mut oracle = EthCheckpointOracle::new(provider.clone(), config.token_address)
        .with_metrics(metrics.clone());
    if let Some(max_elapsed) = config.oracle_retry_max_elapsed {
        oracle = oracle.with_retry(max_elapsed);
    }
    let mut pipeline = GovernancePipeline::for_governor(
        config.governor_address,
        config.token_address,
        Arc::new(oracle),
        config.detection.clone(),
        &config.protocol,
    )
    .with_metrics(metrics.clone());

    let cancel = CancellationToken::new();
    let (syncer_handle, mut transactions) = GovernanceLogSyncer::from_config(provider, &config)
        .with_metrics(metrics)
        .run(cancel.clone())
        .await
        .context("Failed to start log syncer")?;

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
        }
        shutdown.cancel();
    });

    info!(
        "Governance monitor started: governor={:?}, token={:?}, protocol={}",
        config.governor_address, config.token_address, config.protocol
    );
    while let Some(tx) = transactions.recv().await {
        match pipeline.handle_transaction(&tx).await {
            Ok(alerts) => {
                for alert in &alerts {
                    emit(alert);
                }
            }
            // The transaction is dropped; store updates made before the
            // failing stage are kept
            Err(e) => error!(
                "Failed to process tx {:?} at block {}: {}",
                tx.tx_hash, tx.block_number, e
            ),
        }
    }

    syncer_handle
        .await
        .map_err(|e| anyhow::anyhow!("Task join error: {}", e))
}

fn emit(alert: &Alert) {
    warn!(
        "{} [{}] {}",
        alert.alert_id, alert.severity, alert.description
    );
    match serde_json::to_string(alert) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{}", line) {
                error!("Failed to write alert: {}", e);
            }
        }
        Err(e) => error!("Failed to serialize alert {}: {}", alert.alert_id, e),
    }
}
