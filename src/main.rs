mod config;
mod db;
mod extract;
mod fetch;
mod handlers;
mod models;
mod parser;
mod router;
mod transport;
mod utils;

use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use db::Store;
use extract::Extractor;
use fetch::FetchService;
use parser::{FileTemplateParser, TemplateMap};
use transport::SshTransport;

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub fetch_service: Arc<FetchService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netcmdb=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting NetCMDB Server");
    tracing::info!("Database: {}", cfg.db_path);
    tracing::info!("Listen: {}", cfg.listen_addr);

    // Initialize database
    let store = Store::with_pool_size(&cfg.db_path, cfg.db_max_connections).await?;
    tracing::info!("Database initialized (pool_size={})", cfg.db_max_connections);

    // Template-driven extraction
    let template_parser = FileTemplateParser::new(&cfg.templates_dir);
    tracing::info!("Templates: {}", template_parser.dir().display());
    let extractor = Extractor::new(
        TemplateMap::with_overrides(&cfg.template_map),
        Arc::new(template_parser),
    );

    // Initialize fetch service
    let policy = cfg.fetch_policy();
    let transport = Arc::new(SshTransport::new(cfg.ssh_connect_timeout(), policy.fetch_timeout));
    let fetch_service = FetchService::new(store.clone(), transport, extractor, policy);

    if cfg.fetch_schedule.trim().is_empty() {
        tracing::info!("Scheduled fetch disabled");
    } else {
        fetch::start_scheduler(fetch_service.clone(), cfg.fetch_schedule.trim())?;
    }

    // Create app state
    let state = Arc::new(AppState {
        store,
        config: cfg.clone(),
        fetch_service,
    });

    // Build router
    let app = router::build(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!("NetCMDB listening on {}", cfg.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("NetCMDB shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
