use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use powercycle::backend::{Backend, HttpBackend};
use powercycle::config::Config;
use powercycle::coordinator::{self, ServerStatusRegistry};
use powercycle::error::Error;

#[derive(Parser)]
#[command(
    name = "powercycle",
    version,
    about = "Coordinate power transitions of cloud servers around offline-only changes",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file (environment variables are used otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics after the command finishes
    #[arg(long, global = true)]
    metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List servers known to the backend
    List,

    /// Power a server on
    Start {
        /// Server UUID
        id: String,
    },

    /// Shut a server down, forcing a stop after the shutdown timeout
    Shutdown {
        /// Server UUID
        id: String,
    },

    /// Shut a server down and delete it
    Remove {
        /// Server UUID
        id: String,
    },

    /// Hold a server powered off for a maintenance window, then restart it
    Offline {
        /// Server UUID
        id: String,

        /// How long to keep the server off
        #[arg(long, default_value = "0")]
        hold_secs: u64,

        /// Fail if the server no longer exists
        #[arg(long, default_value = "false")]
        required: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;

    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = powercycle::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let ctx = CancellationToken::new();
    spawn_ctrl_c_handler(ctx.clone());

    if let Err(err) = run(&ctx, &config, cli.command).await {
        tracing::error!(
            category = err.category().as_str(),
            recoverable = err.is_recoverable(),
            error = %err,
            "Command failed"
        );
        return Err(err.into());
    }

    if cli.metrics {
        match powercycle::metrics::encode_metrics() {
            Ok(text) => print!("{text}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    tracing::info!("powercycle completed successfully");
    Ok(())
}

async fn run(ctx: &CancellationToken, config: &Config, command: Commands) -> Result<(), Error> {
    if !config.backend.has_credentials() {
        return Err(Error::other(
            "backend credentials missing: set user_id and api_token",
        ));
    }

    let backend = HttpBackend::new(&config.backend)?;
    let registry = coordinator::install_global(Arc::new(ServerStatusRegistry::new(
        config.coordinator.clone(),
    )))?;

    let added = coordinator::init_global_server_status_list(ctx, &backend).await?;
    tracing::debug!(servers = added, "Loaded server inventory");

    match command {
        Commands::List => list(ctx, &backend).await?,

        Commands::Start { id } => {
            tracing::info!(server_id = %id, "Starting server");
            registry.start_server_synchronously(ctx, &backend, &id).await?;
        }

        Commands::Shutdown { id } => {
            tracing::info!(server_id = %id, "Shutting down server");
            registry.shutdown_server_synchronously(ctx, &backend, &id).await?;
        }

        Commands::Remove { id } => {
            tracing::info!(server_id = %id, "Removing server");
            registry.remove_server_synchronously(ctx, &backend, &id).await?;
        }

        Commands::Offline {
            id,
            hold_secs,
            required,
        } => {
            tracing::info!(
                server_id = %id,
                hold_secs = %hold_secs,
                required = %required,
                "Holding server offline"
            );
            registry
                .run_action_require_server_off(ctx, &backend, &id, required, |ctx| async move {
                    tokio::select! {
                        _ = ctx.cancelled() => anyhow::bail!("maintenance window cancelled"),
                        _ = tokio::time::sleep(Duration::from_secs(hold_secs)) => Ok(()),
                    }
                })
                .await?;
        }
    }

    tracing::debug!(stats = %registry.stats().await.display(), "Registry state");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("powercycle=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("powercycle={level},warn"))
            .context("Invalid log level")?
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

fn spawn_ctrl_c_handler(ctx: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            ctx.cancel();
        }
    });
}

async fn list(ctx: &CancellationToken, backend: &dyn Backend) -> Result<(), Error> {
    let servers = backend.get_server_list(ctx).await?;
    for server in &servers {
        let power = if server.power { "on" } else { "off" };
        println!("{}  {:<3}  {}", server.id, power, server.name);
    }
    println!("{} server(s)", servers.len());
    Ok(())
}
