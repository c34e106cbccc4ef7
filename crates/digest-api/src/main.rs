//! digest-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use digest_api::{router, AppState};
use digest_core::{defaults, AiConfig, PipelineLimits, SystemClock};
use digest_db::{Database, PoolConfig};
use digest_inference::OpenAIBackend;
use digest_jobs::{seed_ai_config, AutoSummaryScheduler, SchedulerConfig, SummaryService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "digest_api=debug,digest_jobs=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("digest-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/digest".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| defaults::SERVER_HOST.to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    info!("Connecting to database...");
    let db = Database::connect(&database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    if let Some(config) = ai_config_from_env() {
        match seed_ai_config(&db.settings, &config).await {
            Ok(true) => {}
            Ok(false) => info!("AI configuration already present, leaving it unchanged"),
            Err(e) => warn!(error = %e, "Ignoring AI configuration from environment"),
        }
    }

    let backend = Arc::new(OpenAIBackend::from_env()?);
    let service = Arc::new(SummaryService::new(
        Arc::new(db.notes.clone()),
        Arc::new(db.settings.clone()),
        backend,
        Arc::new(SystemClock),
        PipelineLimits::default(),
    ));

    let scheduler = AutoSummaryScheduler::new(service.clone(), SchedulerConfig::from_env());
    let state = AppState::new(service, scheduler.clone());
    let shutdown = state.shutdown.clone();
    let scheduler_handle = scheduler.start();

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    if let Err(e) = scheduler_handle.shutdown().await {
        // Disabled schedulers exit immediately and drop their receiver.
        info!(error = %e, "Auto-summary scheduler already stopped");
    }
    info!("Server stopped");
    Ok(())
}

/// Bootstrap AI configuration from `AI_ENDPOINT`, `AI_API_KEY`, `AI_MODEL`
/// and optional `AI_SYSTEM_PROMPT`. Returns `None` unless all required values
/// are set.
fn ai_config_from_env() -> Option<AiConfig> {
    let var = |name: &str| {
        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    Some(AiConfig {
        endpoint: var("AI_ENDPOINT")?,
        api_key: var("AI_API_KEY")?,
        model: var("AI_MODEL")?,
        system_prompt: var("AI_SYSTEM_PROMPT").unwrap_or_default(),
    })
}
