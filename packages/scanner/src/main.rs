use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use yieldscope_scanner::notifier::{
    send_test_notification, DistributionMessage, LogNotifier, Notifier, RedisNotifier,
};
use yieldscope_scanner::rpc::{AlloyLedgerClient, LedgerClient};
use yieldscope_scanner::scanner::BlockScanner;
use yieldscope_scanner::service::ScannerService;
use yieldscope_scanner::{signatures, Config};

#[derive(Parser, Debug)]
#[command(name = "yieldscope", version, about = "Watch a chain for yield distributions")]
struct Cli {
    /// Read configuration from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Node endpoint (overrides RPC_URL)
    #[arg(long)]
    rpc_url: Option<String>,

    /// First block to scan (overrides START_BLOCK)
    #[arg(long)]
    start_block: Option<u64>,

    /// Blocks to wait before scanning (overrides BLOCK_CONFIRMATIONS)
    #[arg(long)]
    confirmations: Option<u64>,

    /// Seconds between polls (overrides POLL_INTERVAL)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Log distributions instead of publishing them
    #[arg(long)]
    dry_run: bool,

    /// Print a status snapshot as JSON and exit
    #[arg(long)]
    status: bool,

    /// Scan only this block, print its distributions as JSON and exit
    #[arg(long, value_name = "N", conflicts_with = "status")]
    block: Option<u64>,

    /// With --block, also deliver the records found
    #[arg(long, requires = "block")]
    notify: bool,

    /// Send one sample distribution through the notifier and exit
    #[arg(long, conflicts_with_all = ["status", "block"])]
    test_notification: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.env_file {
            Some(path) => Config::from_env_file(path),
            None => Config::from_env(),
        }
        .context("failed to load configuration")?;

        if let Some(rpc_url) = &self.rpc_url {
            config.rpc_url = rpc_url.clone();
        }
        if let Some(start_block) = self.start_block {
            config.start_block = Some(start_block);
        }
        if let Some(confirmations) = self.confirmations {
            config.confirmations = confirmations;
        }
        if let Some(secs) = self.poll_interval {
            anyhow::ensure!(secs > 0, "--poll-interval must be at least 1 second");
            config.poll_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

async fn build_notifier(config: &Config, dry_run: bool) -> anyhow::Result<Box<dyn Notifier>> {
    if dry_run {
        tracing::info!("Dry run: distributions are logged, not published");
        return Ok(Box::new(LogNotifier));
    }
    let notifier = RedisNotifier::connect(&config.redis_url, config.redis_channel.clone())
        .await
        .with_context(|| format!("failed to connect to Redis at {}", config.redis_url))?;
    tracing::info!(channel = notifier.channel(), "Publishing distributions to Redis");
    Ok(Box::new(notifier))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    signatures::init();

    if cli.test_notification {
        let notifier = build_notifier(&config, cli.dry_run).await?;
        anyhow::ensure!(
            send_test_notification(notifier.as_ref()).await,
            "test notification was not delivered"
        );
        return Ok(());
    }

    let client = AlloyLedgerClient::connect(&config.rpc_config())
        .await
        .context("failed to connect to ledger")?;
    let chain_id = client.chain_id().await.context("failed to read chain id")?;
    if chain_id != config.chain_id {
        tracing::warn!(
            expected = config.chain_id,
            actual = chain_id,
            "Connected node reports a different chain id"
        );
    }

    let scanner = BlockScanner::new(Arc::new(client), config.scanner_config())
        .await
        .context("failed to read chain head")?;

    if cli.status {
        let snapshot = scanner.status_handle().snapshot().await;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if let Some(height) = cli.block {
        let records = scanner
            .scan_block(height)
            .await
            .with_context(|| format!("failed to scan block {}", height))?;
        let messages: Vec<DistributionMessage> =
            records.iter().map(DistributionMessage::from_record).collect();
        println!("{}", serde_json::to_string_pretty(&messages)?);

        if cli.notify && !records.is_empty() {
            let notifier = build_notifier(&config, cli.dry_run).await?;
            let mut failed = 0;
            for record in &records {
                if !notifier.deliver(record).await {
                    failed += 1;
                }
            }
            anyhow::ensure!(failed == 0, "{} of {} notifications failed", failed, records.len());
        }
        return Ok(());
    }

    let notifier = build_notifier(&config, cli.dry_run).await?;

    tracing::info!(
        rewards_manager = %config.rewards_manager,
        slvlusd = %config.slvlusd,
        confirmations = config.confirmations,
        "Monitoring yield distributions"
    );

    let service = ScannerService::new(scanner, notifier);
    let shutdown = service.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.trigger();
        }
    });

    let report = service.run().await?;
    tracing::info!(
        last_processed_block = ?report.last_processed_block,
        delivered = report.deliveries.delivered,
        "Exited cleanly"
    );
    Ok(())
}
