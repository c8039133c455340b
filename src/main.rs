// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{routing::get, Router};
use futures::StreamExt;
use kube::{
    runtime::{controller::Action, finalizer, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use kube_lease_manager::{LeaseManager, LeaseManagerBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use turndown::{
    constants::{
        DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_RETRY_PERIOD_SECS, ENV_NODE_NAME,
        ERROR_REQUEUE_DURATION_SECS, METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH,
        METRICS_SERVER_PORT, PROVIDER_VALIDATE_PROBES, TOKIO_WORKER_THREADS,
    },
    context::Context,
    crd::TurndownSchedule,
    labels::FINALIZER_TURNDOWN_SCHEDULE,
    manager::TurndownManager,
    metrics,
    provider::{detect_provider, validate},
    reconcilers::{cleanup_schedule, reconcile_turndown_schedule},
    scheduler::TurndownScheduler,
    store::KubernetesScheduleStore,
    strategy::strategy_for_capabilities,
};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] turndown::errors::TurndownError);

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("turndown-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

/// Initialize logging with custom format
///
/// Respects `RUST_LOG` environment variable if set, otherwise defaults to INFO level.
/// Respects `RUST_LOG_FORMAT` environment variable for output format (json or text).
fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting Cluster Turndown Controller");
}

/// Start the Prometheus metrics HTTP server
///
/// Serves metrics on the configured port and path (default: 0.0.0.0:8080/metrics)
fn start_metrics_server() -> tokio::task::JoinHandle<()> {
    info!(
        bind_address = METRICS_SERVER_BIND_ADDRESS,
        port = METRICS_SERVER_PORT,
        path = METRICS_SERVER_PATH,
        "Starting Prometheus metrics HTTP server"
    );

    tokio::spawn(async move {
        async fn metrics_handler() -> String {
            match metrics::gather_metrics() {
                Ok(metrics_text) => metrics_text,
                Err(e) => {
                    error!("Failed to gather metrics: {}", e);
                    String::from("# Error gathering metrics\n")
                }
            }
        }

        let app = Router::new().route(METRICS_SERVER_PATH, get(metrics_handler));

        let bind_addr = format!("{METRICS_SERVER_BIND_ADDRESS}:{METRICS_SERVER_PORT}");
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {bind_addr}: {e}");
                return;
            }
        };

        info!("Metrics server listening on http://{bind_addr}{METRICS_SERVER_PATH}");

        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {e}");
        }
    })
}

/// Leader election configuration
struct LeaderElectionConfig {
    enabled: bool,
    lease_name: String,
    lease_namespace: String,
    identity: String,
    lease_duration: u64,
    retry_period: u64,
}

/// Load leader election configuration from environment variables
fn load_leader_election_config() -> LeaderElectionConfig {
    let enabled = std::env::var("TURNDOWN_ENABLE_LEADER_ELECTION")
        .unwrap_or_else(|_| "true".to_string())
        .parse::<bool>()
        .unwrap_or(true);

    let lease_name =
        std::env::var("TURNDOWN_LEASE_NAME").unwrap_or_else(|_| "turndown-leader".to_string());

    let lease_namespace = std::env::var("TURNDOWN_LEASE_NAMESPACE")
        .or_else(|_| std::env::var("POD_NAMESPACE"))
        .unwrap_or_else(|_| "turndown-system".to_string());

    let lease_duration = std::env::var("TURNDOWN_LEASE_DURATION_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_DURATION_SECS);

    let retry_period = std::env::var("TURNDOWN_LEASE_RETRY_PERIOD_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LEASE_RETRY_PERIOD_SECS);

    let identity = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("turndown-{}", rand::random::<u32>()));

    LeaderElectionConfig {
        enabled,
        lease_name,
        lease_namespace,
        identity,
        lease_duration,
        retry_period,
    }
}

async fn async_main() -> Result<()> {
    initialize_logging();

    let node = std::env::var(ENV_NODE_NAME).unwrap_or_default();
    info!(node = %node, "Running cluster turndown on node");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    // Start the metrics HTTP server
    let _metrics_handle = start_metrics_server();

    // Schedule persistence via the TurndownSchedule custom resource
    let store = Arc::new(KubernetesScheduleStore::new(client.clone()));

    // Cloud provider: selected exactly once, validated before anything runs.
    // An unsupported provider is fatal.
    let provider = detect_provider(client.clone()).await?;
    validate(provider.as_ref(), PROVIDER_VALIDATE_PROBES).await?;

    // Strategy from the provider's capability declaration
    let strategy = strategy_for_capabilities(client.clone(), provider.clone())?;
    info!(
        provider = provider.name(),
        strategy = strategy.name(),
        "Turndown strategy selected"
    );

    // Turndown management and scheduling
    let manager = Arc::new(TurndownManager::new(
        provider.clone(),
        strategy,
        store.clone(),
    ));
    let scheduler = Arc::new(TurndownScheduler::new(manager.clone(), store.clone()));

    let ctx = Arc::new(Context {
        client: client.clone(),
        store,
        scheduler,
        manager,
    });

    let config = load_leader_election_config();

    if config.enabled {
        info!(
            lease_name = %config.lease_name,
            lease_namespace = %config.lease_namespace,
            identity = %config.identity,
            lease_duration_secs = config.lease_duration,
            "Leader election enabled"
        );

        info!("Starting leader election, waiting to acquire leadership...");
        let lease_manager = LeaseManagerBuilder::new(client.clone(), &config.lease_name)
            .with_namespace(&config.lease_namespace)
            .with_identity(&config.identity)
            .with_duration(config.lease_duration)
            .with_grace(config.retry_period)
            .build()
            .await?;

        let (leader_rx, lease_handle) = lease_manager.watch().await;

        let mut rx = leader_rx.clone();
        while !*rx.borrow_and_update() {
            rx.changed().await?;
        }

        info!("Leadership acquired, starting controller");
        run_with_leader_election(client, ctx, leader_rx, lease_handle).await?;
    } else {
        warn!("Leader election DISABLED - running without high availability");
        run_without_leader_election(client, ctx).await?;
    }

    Ok(())
}

/// Monitor leadership status - returns when leadership is lost or an error occurs
async fn monitor_leadership(
    mut leader_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    loop {
        leader_rx.changed().await?;
        if !*leader_rx.borrow() {
            return Ok(());
        }
    }
}

/// Run the controller and HTTP API with signal handling
async fn run_without_leader_election(client: Client, ctx: Arc<Context>) -> Result<()> {
    let shutdown_result: Result<()> = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            result.map_err(anyhow::Error::from)
        }

        result = wait_for_sigterm() => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            result
        }

        result = run_controller(client.clone(), ctx) => {
            error!("CRITICAL: TurndownSchedule controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("TurndownSchedule controller exited unexpectedly without error")
        }

        result = turndown::api::serve(client) => {
            error!("CRITICAL: Turndown API server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Turndown API server exited unexpectedly without error")
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully");
    Ok(())
}

/// Run the controller and HTTP API while monitoring leadership and signals
async fn run_with_leader_election(
    client: Client,
    ctx: Arc<Context>,
    leader_rx: tokio::sync::watch::Receiver<bool>,
    _lease_handle: tokio::task::JoinHandle<
        Result<LeaseManager, kube_lease_manager::LeaseManagerError>,
    >,
) -> Result<()> {
    let shutdown_result: Result<()> = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            info!("Stopping controller and releasing leader election lease...");
            result.map_err(anyhow::Error::from)
        }

        result = wait_for_sigterm() => {
            info!("Received SIGTERM (pod termination), initiating graceful shutdown...");
            info!("Stopping controller and releasing leader election lease...");
            result
        }

        result = monitor_leadership(leader_rx) => {
            match result {
                Ok(()) => {
                    warn!("Leadership lost! Stopping controller...");
                    anyhow::bail!("Leadership lost - stepping down")
                }
                Err(e) => {
                    error!("Leadership monitor error: {:?}", e);
                    anyhow::bail!("Leadership monitoring failed: {e}")
                }
            }
        }

        result = run_controller(client.clone(), ctx) => {
            error!("CRITICAL: TurndownSchedule controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("TurndownSchedule controller exited unexpectedly without error")
        }

        result = turndown::api::serve(client) => {
            error!("CRITICAL: Turndown API server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Turndown API server exited unexpectedly without error")
        }
    };

    shutdown_result?;
    info!("Graceful shutdown completed successfully, leader election lease released");
    Ok(())
}

/// Wait for SIGTERM (Kubernetes sends this when deleting pods)
async fn wait_for_sigterm() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        sigterm.recv().await;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        // On non-Unix platforms, just wait forever
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Run the `TurndownSchedule` controller
async fn run_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting TurndownSchedule controller");

    let api = Api::<TurndownSchedule>::all(client);

    Controller::new(api, Config::default())
        .run(reconcile_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `TurndownSchedule`: finalizer handling plus metrics
async fn reconcile_wrapper(
    schedule: Arc<TurndownSchedule>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();
    let api: Api<TurndownSchedule> = Api::all(ctx.client.clone());

    debug!(
        schedule = %schedule.name_any(),
        "Reconcile wrapper called for TurndownSchedule"
    );

    let result = finalizer(
        &api,
        FINALIZER_TURNDOWN_SCHEDULE,
        schedule.clone(),
        |event| async {
            match event {
                finalizer::Event::Apply(schedule) => {
                    reconcile_turndown_schedule(ctx.clone(), &schedule)
                        .await
                        .map_err(ReconcileError::from)
                }
                finalizer::Event::Cleanup(schedule) => cleanup_schedule(ctx.clone(), &schedule)
                    .await
                    .map_err(ReconcileError::from),
            }
        },
    )
    .await;

    let duration = start.elapsed();
    if result.is_ok() {
        metrics::record_reconciliation_success(duration);
    } else {
        metrics::record_reconciliation_error(duration);
    }

    result.map_err(|e: finalizer::Error<ReconcileError>| match e {
        finalizer::Error::ApplyFailed(err) | finalizer::Error::CleanupFailed(err) => err,
        finalizer::Error::AddFinalizer(err) | finalizer::Error::RemoveFinalizer(err) => {
            ReconcileError::from(turndown::errors::TurndownError::Kube(err))
        }
        finalizer::Error::UnnamedObject => ReconcileError::from(
            turndown::errors::TurndownError::InvariantViolation(
                "TurndownSchedule has no name".to_string(),
            ),
        ),
        finalizer::Error::InvalidFinalizer => ReconcileError::from(
            turndown::errors::TurndownError::InvariantViolation(
                "invalid finalizer name".to_string(),
            ),
        ),
    })
}

/// Error policy: requeue after a fixed delay
fn error_policy(
    _schedule: Arc<TurndownSchedule>,
    _err: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}
