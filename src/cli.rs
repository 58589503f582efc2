use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app_state::{bootstrap_policy_store, AppState};
use crate::config_loader::{load_config, GatewayConfig};
use crate::logging;
use crate::variant_selector;
use crate::web::build_router;

/// Top-level CLI interface for the gateway
#[derive(Parser)]
#[command(
    name = "inference_gateway",
    version,
    about = "Online inference gateway with a live traffic-split policy"
)]
pub struct Cli {
    /// Path to a TOML config file (defaults to gateway.toml or $GATEWAY_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API (predict, health, policy status)
    Serve {
        /// Host/IP to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to bind
        #[arg(long)]
        port: Option<u16>,
    },

    /// Inspect the traffic-split policy
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
}

#[derive(Subcommand)]
pub enum PolicyCommand {
    /// Fetch the policy once and print it
    Show,

    /// Draw selections against the current policy and print the observed split
    Simulate {
        #[arg(long, default_value_t = 1000)]
        requests: u64,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref()).context("failed to load config")?;
    logging::init(&config.log_level);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.validate()?;
            rt.block_on(serve(config))
        }
        Commands::Policy { command } => rt.block_on(policy_command(&config, command)),
    }
}

/// Bootstrap the policy, start the refresh loop and serve until a shutdown
/// signal arrives.
pub async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let state = Arc::new(
        AppState::from_config(&config)
            .await
            .context("failed to bootstrap gateway")?,
    );

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, env = %config.env, "starting server");
    let app = build_router(state.clone());
    with_policy_refresh(&state, config.policy.refresh_interval(), async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")
    })
    .await?;

    info!("server shutdown complete");
    Ok(())
}

/// Drive `server` with the policy refresh loop running alongside it. The
/// loop is cancelled and awaited once `server` completes, whatever its result.
pub async fn with_policy_refresh<F>(
    state: &AppState,
    interval: Duration,
    server: F,
) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let shutdown = CancellationToken::new();
    let refresh = state.policy().start(interval, shutdown.clone())?;

    let served = server.await;

    info!("shutting down policy refresh");
    shutdown.cancel();
    if let Err(e) = refresh.await {
        warn!(error = %e, "policy refresh task ended abnormally");
    }
    served
}

async fn policy_command(config: &GatewayConfig, command: PolicyCommand) -> anyhow::Result<()> {
    let store = bootstrap_policy_store(config).await?;
    let snapshot = store.snapshot();

    match command {
        PolicyCommand::Show => {
            println!("source:  {}", store.source_address());
            println!("digest:  {}", snapshot.digest);
            println!("{}", serde_json::to_string_pretty(&*snapshot.policy)?);
        }
        PolicyCommand::Simulate { requests } => {
            let policy = &snapshot.policy;
            let fallback = config.policy.fallback_variant.as_str();
            let mut rng = rand::rng();
            let mut counts: HashMap<&str, u64> = HashMap::new();
            for _ in 0..requests {
                *counts
                    .entry(variant_selector::choose(policy, fallback, &mut rng))
                    .or_default() += 1;
            }

            let total = policy.total_weight();
            if total == 0 {
                println!("all weights are zero; every request goes to '{fallback}'");
            }
            for (name, weight) in policy.iter() {
                let served = counts.get(name).copied().unwrap_or(0);
                let expected = if total == 0 {
                    0.0
                } else {
                    weight as f64 * 100.0 / total as f64
                };
                println!(
                    "{name:<24} served {served:>8} ({:>6.2}%)  expected {expected:>6.2}%",
                    served as f64 * 100.0 / requests.max(1) as f64
                );
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
