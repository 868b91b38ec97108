//! gradwatch - graduation watcher and liquidity bot
//!
//! Wires the pipeline together:
//!
//! - **Log stream**: `logsSubscribe` on the migration program
//! - **Listener**: turns migration logs into graduated-token events
//! - **Registry**: holds each token for a bounded time
//! - **Reconciler**: looks for a qualifying DAMM v2 pool per token
//! - **Orchestrator**: buys through Jupiter and adds liquidity

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gradwatch::config::Config;
use gradwatch::endpoints;
use gradwatch::liquidity::DammV2Builder;
use gradwatch::listener::{EventListener, ListenerConfig, ListenerStats};
use gradwatch::metrics::metrics;
use gradwatch::notifier::{NotificationSink, Notifier, TelegramNotifier, WebhookNotifier};
use gradwatch::orchestrator::{ActionOrchestrator, OrchestratorSettings};
use gradwatch::reconciler::{Reconciler, ReconcilerState};
use gradwatch::registry::{intake, CandidateRegistry};
use gradwatch::rpc::{RetryPolicy, RpcChainClient};
use gradwatch::streaming::{LogStreamProvider, WebSocketLogStream};
use gradwatch::supervisor::Supervisor;
use gradwatch::swap::JupiterClient;
use gradwatch::types::{AppState, Mode};
use gradwatch::wallet::WalletManager;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Operating mode
    #[arg(short, long, default_value = "simulation", value_parser = ["simulation", "production"])]
    mode: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Overrides monitoring.metrics_port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    info!("Starting gradwatch {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config.validate().context("Invalid configuration")?;

    let mode = if args.mode == "production" {
        Mode::Production
    } else {
        Mode::Simulation
    };
    info!(mode = ?mode, "Operating mode");
    let app_state = AppState::new(mode);

    let wallet = WalletManager::from_config(&config.wallet).context("Failed to load wallet")?;
    info!(wallet = %wallet.pubkey(), "Wallet loaded");

    let mut supervisor = Supervisor::new();

    if config.monitoring.enable_metrics {
        let port = args.metrics_port.unwrap_or(config.monitoring.metrics_port);
        let shutdown = supervisor.subscribe();
        supervisor.spawn("endpoints", async move {
            if let Err(e) = endpoints::endpoint_server(port, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let retry = RetryPolicy::new(config.rpc.rate_limit_attempts, config.rpc.rate_limit_base_delay_ms);
    let timeout = Duration::from_secs(config.rpc.timeout_secs);
    let chain = Arc::new(RpcChainClient::new(&config.rpc.url, timeout, retry.clone()));

    let notifier = build_notifier(&config, timeout, &retry)?;

    let swap = Arc::new(
        JupiterClient::new(
            &config.trading.jupiter_base_url,
            config.trading.jupiter_api_key.clone(),
            timeout,
            retry.clone(),
        )
        .context("Failed to build Jupiter client")?,
    );

    let dex_program = config.reconciler.dex_program_id()?;
    let orchestrator = Arc::new(ActionOrchestrator::new(
        chain.clone(),
        swap,
        Arc::new(DammV2Builder::new(dex_program)),
        wallet.keypair_arc(),
        notifier.clone(),
        app_state.clone(),
        OrchestratorSettings::from_config(&config, mode),
    ));

    let registry = Arc::new(CandidateRegistry::new(Duration::from_millis(
        config.registry.candidate_ttl_ms,
    )));
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        chain.clone(),
        orchestrator,
        Arc::new(ReconcilerState::new()),
        app_state.clone(),
        dex_program,
        config.reconciler.interval(),
    ));

    let listener_config = ListenerConfig::try_from(&config.listener)?;
    let migration_program = listener_config.migration_program;
    let (log_tx, log_rx) = mpsc::channel(listener_config.channel_capacity);
    let (event_tx, event_rx) = mpsc::channel(listener_config.channel_capacity);
    let listener = Arc::new(EventListener::new(listener_config, chain.clone()));
    let listener_stats = listener.stats();

    let stream = WebSocketLogStream::new(config.rpc.ws_url.clone());
    let shutdown = supervisor.subscribe();
    supervisor.spawn("log-stream", async move {
        if let Err(e) = stream.stream_logs(migration_program, log_tx, shutdown).await {
            error!(error = %e, "Log stream stopped");
        }
    });

    let shutdown = supervisor.subscribe();
    supervisor.spawn("listener", listener.run(log_rx, event_tx, shutdown));

    let shutdown = supervisor.subscribe();
    supervisor.spawn(
        "intake",
        intake(registry.clone(), event_rx, notifier, app_state.clone(), shutdown),
    );

    let shutdown = supervisor.subscribe();
    supervisor.spawn("reconciler", reconciler.clone().run(shutdown));

    info!("All components started");
    run_event_loop(&config, &app_state, &registry, &reconciler, &listener_stats).await;

    info!("Shutting down gracefully...");
    reconciler.stop();
    let late = supervisor.stop(Duration::from_secs(10)).await;
    if !late.is_empty() {
        warn!(workers = ?late, "Workers aborted at shutdown");
    }
    registry.clear();
    let drained = reconciler
        .drain_in_flight(Duration::from_secs(config.reconciler.drain_timeout_secs))
        .await;
    if !drained {
        warn!("Some actions were still running at exit");
    }

    Ok(())
}

fn build_notifier(config: &Config, timeout: Duration, retry: &RetryPolicy) -> Result<NotificationSink> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    if let Some(url) = &config.notifier.webhook_url {
        notifiers.push(Arc::new(WebhookNotifier::new(url.clone(), timeout, retry.clone())?));
    }
    if let (Some(token), Some(chat)) = (&config.notifier.telegram_bot_token, &config.notifier.telegram_chat_id) {
        notifiers.push(Arc::new(TelegramNotifier::new(
            token.clone(),
            chat.clone(),
            config.notifier.telegram_api_base.clone(),
            timeout,
            retry.clone(),
        )?));
    }

    info!(count = notifiers.len(), "Notifiers configured");
    Ok(NotificationSink::new(notifiers))
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose { "gradwatch=debug,info" } else { "gradwatch=info,warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()?;
    }

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults and environment", path);
        let mut config = Config::default();
        dotenvy::dotenv().ok();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }
}

/// Periodic stats until ctrl-c or SIGTERM
async fn run_event_loop(
    config: &Config,
    app_state: &AppState,
    registry: &CandidateRegistry,
    reconciler: &Reconciler,
    listener_stats: &ListenerStats,
) {
    let mut stats_interval =
        tokio::time::interval(Duration::from_secs(config.monitoring.stats_interval_secs.max(1)));

    #[cfg(unix)]
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            None
        }
    };

    loop {
        #[cfg(unix)]
        let terminate = async {
            match sigterm.as_mut() {
                Some(s) => {
                    s.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = stats_interval.tick() => {
                let stats = app_state.snapshot().await;
                let listener = listener_stats.snapshot();
                info!(
                    pending = registry.len(),
                    seen_pools = reconciler.seen_pools(),
                    in_flight = metrics().in_flight_actions.get(),
                    migrations = stats.migrations_seen,
                    matched = stats.pools_matched,
                    succeeded = stats.actions_succeeded,
                    warned = stats.actions_warned,
                    failed = stats.actions_failed,
                    spent_sol = stats.total_spent_sol,
                    logs_seen = listener.seen,
                    logs_emitted = listener.emitted,
                    "Statistics"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received ctrl-c");
                break;
            }
            _ = terminate => {
                info!("Received SIGTERM");
                break;
            }
        }
    }
}
