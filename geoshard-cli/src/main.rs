use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geoshard::{
    bootstrap, Region, ShardConfig, ShardKey, ShardManager, ShardStrategy, StrategyKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "geoshard")]
#[command(about = "Geoshard CLI - shard routing tools")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Routing strategy
    #[arg(long, global = true, default_value = "region")]
    strategy: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision the schema on every configured shard
    Bootstrap,

    /// Check shard reachability and schema completeness
    Verify,

    /// Resolve a routing key to its shard
    Route {
        /// Routing key, `region:entity_type:entity_id[:tenant_id]`
        key: String,

        /// Also show the latency-optimal shard for a client region
        #[arg(long)]
        client_region: Option<String>,
    },

    /// Show topology and load metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ShardConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ShardConfig::default(),
    };
    let strategy: StrategyKind = match cli.strategy.as_str() {
        "region" => StrategyKind::Region,
        "geographic" => StrategyKind::Geographic,
        other => anyhow::bail!("unknown strategy: {other}"),
    };

    let manager = Arc::new(ShardManager::new(config, strategy).await?);

    match cli.command {
        Commands::Bootstrap => {
            let initialized = bootstrap::bootstrap_all(&manager).await;
            let total = manager.snapshot().await.len();
            tracing::info!(initialized, total, "bootstrap finished");
            println!("initialized {initialized}/{total} shards");
            if initialized < total {
                std::process::exit(1);
            }
        }
        Commands::Verify => {
            let reports = bootstrap::verify_shards(&manager).await;
            let mut failures = 0;
            for report in &reports {
                if report.healthy {
                    println!("{}: ok", report.shard_id);
                } else {
                    failures += 1;
                    match &report.error {
                        Some(err) => println!("{}: unreachable ({err})", report.shard_id),
                        None => println!(
                            "{}: missing tables {}",
                            report.shard_id,
                            report.missing_tables.join(", ")
                        ),
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} of {} shards unhealthy", reports.len());
            }
        }
        Commands::Route { key, client_region } => {
            let key = ShardKey::from_routing_key(&key)?;
            let shard = manager.get_shard(&key)?;
            println!("{}", serde_json::to_string_pretty(&shard)?);

            if let Some(client_region) = client_region {
                let client_region: Region = client_region.parse()?;
                let optimal = manager.strategy().optimal_shard(&key, client_region)?;
                println!("optimal for {client_region}: {}", optimal.shard_id);
            }
        }
        Commands::Metrics => {
            let metrics = manager.get_metrics().await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    Ok(())
}
