use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use floodgate::admission::AdmissionGuard;
use floodgate::config::Config;
use floodgate::importer::{
    ImportWorkload, RepositoryConfig, SourceConfig, UserRepository, UserSourceClient,
};
use floodgate::jobs::{JobRunner, JobStatusStore};
use floodgate::server::{ImportServer, ServerConfig};
use floodgate::store::redis::RedisStoreConfig;
use floodgate::store::{DynStore, ExpiryListener, RedisStore, Sweeper};

#[derive(Parser)]
#[command(
    name = "floodgate",
    version,
    about = "Bulk user-import service with distributed admission control",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the import service: HTTP server, expiry listener and sweeper
    Serve {
        /// Override the bind address from configuration
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },

    /// Run one sweep pass over the running sets and exit
    Sweep,

    /// Print the effective tier table and exit
    Tiers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;
    tracing::info!("floodgate starting");

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await?,
        Commands::Sweep => sweep_once(config).await?,
        Commands::Tiers => print_tiers(&config)?,
    }

    Ok(())
}

async fn serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> Result<()> {
    if let Some(addr) = bind {
        config.server.bind_address = addr;
    }

    let store = connect_store(&config).await?;

    let guard = Arc::new(AdmissionGuard::new(
        store.clone(),
        config.tier_table()?,
        config.safety_key_ttl(),
    ));
    let status = Arc::new(JobStatusStore::new(store.clone(), config.status_ttl()));

    let source_client = Arc::new(UserSourceClient::new(SourceConfig {
        api_url: config.importer.api_url.clone(),
        timeout: Duration::from_secs(config.importer.request_timeout_secs),
        ..SourceConfig::default()
    })?);
    let repository = Arc::new(
        UserRepository::connect(&RepositoryConfig {
            database_url: config.importer.postgres_url.clone(),
            pool_size: config.importer.postgres_pool_size,
        })
        .await?,
    );
    repository.init_schema().await?;

    let workload = Arc::new(ImportWorkload::new(
        source_client,
        repository,
        config.importer.batch_size,
        config.jobs.progress_interval,
    ));

    let runner = Arc::new(JobRunner::new(
        guard,
        status.clone(),
        workload,
        config.jobs.worker_pool_size,
    ));

    // Background self-healing tasks
    let listener = Arc::new(ExpiryListener::new(store.clone()));
    tokio::spawn(listener.run(config.store.redis_url.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if config.admission.sweep_interval_secs > 0 {
        let sweeper = Arc::new(Sweeper::new(
            store.clone(),
            Duration::from_secs(config.admission.sweep_interval_secs),
        ));
        tokio::spawn(sweeper.run(shutdown_rx));
    }

    let server = ImportServer::new(
        ServerConfig {
            bind_address: config.server.bind_address,
            enable_cors: config.server.enable_cors,
            enable_request_logging: config.server.enable_request_logging,
        },
        runner,
        status,
    );

    server
        .start_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}

async fn sweep_once(config: Config) -> Result<()> {
    let store = connect_store(&config).await?;
    let sweeper = Sweeper::new(store, Duration::from_secs(1));

    let removed = sweeper.sweep().await?;
    tracing::info!(removed = removed, "Sweep complete");
    println!("Removed {removed} orphaned running-set members");
    Ok(())
}

fn print_tiers(config: &Config) -> Result<()> {
    use floodgate::Tier;

    let table = config.tier_table()?;
    println!("{:<8} {:>12} {:>15} {:>10}", "TIER", "MAX COUNT", "MAX CONCURRENT", "COOLDOWN");
    for tier in Tier::ALL {
        let limits = table.limits(tier);
        let max_count = if limits.max_count == u64::MAX {
            "unbounded".to_string()
        } else {
            limits.max_count.to_string()
        };
        println!(
            "{:<8} {:>12} {:>15} {:>9}s",
            tier.name(),
            max_count,
            limits.max_concurrent,
            limits.cooldown_seconds
        );
    }
    Ok(())
}

async fn connect_store(config: &Config) -> Result<DynStore> {
    let store = RedisStore::connect(&RedisStoreConfig {
        url: config.store.redis_url.clone(),
        pool_size: config.store.pool_size,
        call_timeout: config.store_call_timeout(),
    })
    .await?;
    Ok(Arc::new(store) as DynStore)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("floodgate=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new(format!("floodgate={level},warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
