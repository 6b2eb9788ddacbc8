use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relayer_core::{
    chain_adapter::DefaultChainFactory,
    channels::error_channel,
    metrics::RelayMetrics,
    processor::{PayloadShape, ProcessorPipeline, ResourceAllowList},
    Config, Relayer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 验证并解析配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// 启动中继器服务，Ctrl-C 退出
    Start {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

#[derive(Tabled)]
struct ChainRow {
    domain: u8,
    name: String,
    adapter: String,
    bridge: String,
    start_block: u64,
    confirmations: u64,
    resources: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_summary(config: &Config) {
    let rows: Vec<ChainRow> = config
        .chains
        .iter()
        .map(|chain| ChainRow {
            domain: chain.domain_id,
            name: chain.name.clone(),
            adapter: chain.adapter_type.clone(),
            bridge: chain.bridge_address.to_string(),
            start_block: chain.start_block,
            confirmations: chain.block_confirmations,
            resources: chain.resources.len(),
        })
        .collect();

    println!("配置文件验证成功!");
    println!("{}", Table::new(rows));
    println!("- 中继器配置:");
    println!("  - 批量大小: {}", config.relayer.batch_size);
    println!("  - 通道容量: {}", config.relayer.channel_capacity);
    println!("  - 最大并发路由数: {}", config.relayer.max_in_flight_routes);
    println!("  - 回滚重试次数: {}", config.relayer.rollback_retries);
    println!("  - 重试间隔: {}ms", config.relayer.retry_delay_ms);
}

async fn start(config: Config) -> Result<()> {
    let metrics = Arc::new(RelayMetrics::new());
    let processors = ProcessorPipeline::new()
        .with(ResourceAllowList::new(config.resource_ids()))
        .with(PayloadShape);

    let relayer = Relayer::from_config(&config, &DefaultChainFactory, metrics.clone(), processors)
        .await
        .context("failed to initialize relayer")?;
    info!("Relayer initialized, starting...");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (errors_tx, mut errors_rx) = error_channel();

    let error_log = tokio::spawn(async move {
        while let Some(e) = errors_rx.recv().await {
            error!("Chain error: {}", e);
        }
    });
    let relayer = tokio::spawn(relayer.start(shutdown_rx, errors_tx));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutdown requested");
        }
        _ = shutdown_tx.closed() => {}
    }
    shutdown_tx.send_replace(true);

    relayer.await.context("relayer task failed")?;
    error_log.await.context("error logger task failed")?;

    let snapshot = metrics.snapshot();
    info!(
        "Relayed {} transfers in {} batches; {} dropped, {} diverged registrations",
        snapshot.transfers, snapshot.batches, snapshot.dropped, snapshot.divergences
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("Validating config file: {:?}", config);
            let config = Config::load(&config)
                .with_context(|| format!("invalid config {}", config.display()))?;
            print_summary(&config);
            Ok(())
        }
        Commands::Start { config } => {
            info!("Using config file: {:?}", config);
            let config = Config::load(&config)
                .with_context(|| format!("invalid config {}", config.display()))?;
            start(config).await
        }
    }
}
