//! Cortex Recommendation Engine
//!
//! Serves hybrid game recommendations over HTTP.
//!
//! # Architecture
//!
//! - **Interaction Store**: in-memory users, items and ratings, optionally
//!   seeded from a JSON dataset
//! - **Recommendation Service**: matrix factorization + tag embeddings
//! - **Retrainer**: optional periodic full retrain from the store
//! - **API Server**: REST endpoints for clients
//!
//! # Graceful Shutdown
//!
//! SIGTERM and SIGINT stop the retrainer and let in-flight requests finish.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cortex::api::{self, AppState};
use cortex::{Config, InMemoryStore, RecommendationService, TrainingOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with structured logging
    init_tracing();

    info!("═══════════════════════════════════════════════════════════════");
    info!("  🚀 Cortex Recommendation Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════════════════════════════");

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    info!("✅ Configuration loaded and validated");

    #[cfg(feature = "prometheus")]
    init_metrics_exporter(config.api.metrics_port)?;

    // Load interaction data
    let store = match &config.data.dataset_path {
        Some(path) => {
            info!("📦 Loading dataset from {}...", path.display());
            InMemoryStore::from_json_file(path)?
        }
        None => {
            warn!("⚠️ No DATASET_PATH set, starting with an empty store");
            InMemoryStore::new()
        }
    };
    let store = Arc::new(store);
    info!("✅ Interaction store ready ({} ratings)", store.rating_count());

    let service = Arc::new(RecommendationService::new(config.engine.clone()));

    // Initial training off the async runtime
    info!("🧠 Running initial training...");
    run_training(service.clone(), store.clone()).await;

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut handles = Vec::new();

    if let Some(interval) = config.retrain_interval {
        info!("📊 Starting periodic retrainer (every {:?})...", interval);
        handles.push(spawn_retrainer(
            service.clone(),
            store.clone(),
            interval,
            shutdown_tx.subscribe(),
        ));
    }

    let state = Arc::new(AppState::new(service, store, config.feedback_seed));
    info!("🌐 Starting API server on port {}...", config.api.port);
    handles.push(spawn_api_server(state, &config, shutdown_tx.subscribe()));

    info!("═══════════════════════════════════════════════════════════════");
    info!("  ✅ All services started successfully");
    info!("  📡 API: http://{}:{}", config.api.host, config.api.port);
    info!(
        "  🔗 Health: http://{}:{}/health",
        config.api.host, config.api.port
    );
    info!("═══════════════════════════════════════════════════════════════");

    // Wait for shutdown signal or service failure
    tokio::select! {
        _ = shutdown_signal() => {
            info!("📴 Shutdown signal received");
        }
        _ = wait_for_any_failure(&mut handles) => {
            warn!("⚠️ A service failed, initiating shutdown");
        }
    }

    info!("🛑 Initiating graceful shutdown...");
    let _ = shutdown_tx.send(());

    let shutdown_timeout = Duration::from_secs(30);
    if tokio::time::timeout(shutdown_timeout, shutdown_services(handles))
        .await
        .is_err()
    {
        warn!("⚠️ Shutdown timeout exceeded, forcing exit");
    }

    info!("👋 Cortex Engine stopped gracefully");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default log levels
        EnvFilter::new("cortex_engine=debug,cortex=debug,tower_http=debug,info")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .init();
}

#[cfg(feature = "prometheus")]
fn init_metrics_exporter(port: u16) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()?;
    info!("✅ Prometheus exporter listening on port {}", port);
    Ok(())
}

/// Full retrain from the store on the blocking pool
async fn run_training(service: Arc<RecommendationService>, store: Arc<InMemoryStore>) {
    let result = tokio::task::spawn_blocking(move || service.train_from_store(&*store)).await;

    match result {
        Ok(Ok(TrainingOutcome::Trained(report))) => info!(
            "✅ Training complete: {} users, {} items, {} epochs",
            report.users, report.items, report.convergence.epochs
        ),
        Ok(Ok(TrainingOutcome::InsufficientData { ratings, required })) => warn!(
            "⚠️ Not enough ratings to train ({} < {}), serving popularity ranking",
            ratings, required
        ),
        Ok(Ok(TrainingOutcome::Skipped)) => info!("Training already running, skipped"),
        Ok(Err(e)) => error!("Failed to read training data: {:?}", e),
        Err(e) => error!("Training task panicked: {:?}", e),
    }
}

/// Spawn the periodic retrainer
fn spawn_retrainer(
    service: Arc<RecommendationService>,
    store: Arc<InMemoryStore>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        // Skip first tick (runs immediately otherwise)
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!("📊 Running scheduled retrain...");
                    run_training(service.clone(), store.clone()).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Retrainer shutting down");
                    break;
                }
            }
        }
    })
}

/// Spawn the API server
fn spawn_api_server(
    state: Arc<AppState>,
    config: &Config,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let api_config = config.api.clone();

    tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
            info!("API server shutting down");
        };
        if let Err(e) = api::start_server(state, api_config, shutdown).await {
            error!("API server error: {:?}", e);
        }
    })
}

/// Wait for any task to finish early
async fn wait_for_any_failure(handles: &mut [tokio::task::JoinHandle<()>]) {
    loop {
        if handles.iter().any(|h| h.is_finished()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for all services to complete shutdown
async fn shutdown_services(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
}
