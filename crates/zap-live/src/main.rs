use anyhow::Result;
use clap::Parser;
use config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zap_live::admin_api::ZapLiveAdminApiImpl;
use zap_live::ai::build_model;
use zap_live::api::Api;
use zap_live::broadcast::BroadcastManager;
use zap_live::http::build_router;
use zap_live::requests::RequestPopups;
use zap_live::settings::Settings;
use zap_live::shell_cache::{ShellCache, render_shell};
use zap_live_db::{MemoryStore, MySqlStore, SharedStore};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the config file, without extension
    #[arg(long, default_value = "config")]
    config: String,
}

async fn open_store(database: &str) -> Result<SharedStore> {
    if database == "memory" {
        info!("Using in-memory document store, nothing is persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let db = MySqlStore::new(database).await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    info!("Starting zap-live");
    let mut tasks = vec![];

    let mut builder = Config::builder()
        .add_source(config::File::with_name(&args.config))
        .add_source(config::Environment::with_prefix("APP").separator("__"));
    #[cfg(debug_assertions)]
    {
        builder = builder.add_source(config::File::with_name("config.dev.yaml").required(false));
    }
    let settings: Settings = builder.build()?.try_deserialize()?;

    // setup termination handler
    let shutdown = CancellationToken::new();
    let shutdown_sig = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown requested!");
        shutdown_sig.cancel();
    })?;

    let store = open_store(&settings.database).await?;
    let model = build_model(settings.ai.as_ref());

    // live broadcasts, expired when heartbeats stop
    let broadcasts = BroadcastManager::new(store.clone());
    tasks.push(broadcasts.start_monitor(shutdown.clone()));

    let popups = Arc::new(RequestPopups::new(store.clone()));

    let mut cache = ShellCache::new(settings.shell_cache.routes.clone());
    cache.install(&settings.shell_cache.version, |route| {
        render_shell(route, &settings.shell_cache.version, &settings.public_url)
    })?;

    let api = Api::new(
        store.clone(),
        settings.clone(),
        broadcasts.clone(),
        popups,
        model.clone(),
    );
    let admin_api = ZapLiveAdminApiImpl::new(
        store.clone(),
        settings.auth_secret.clone(),
        settings.admins.clone(),
        broadcasts,
        model,
    );
    let server = build_router(api, admin_api, &settings, Arc::new(RwLock::new(cache)));

    let http_addr: SocketAddr = settings.listen_http.parse()?;
    let shutdown_http = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        let listener = TcpListener::bind(&http_addr).await?;
        info!("Listening on: {}", http_addr);
        axum::serve(listener, server.layer(CorsLayer::very_permissive()))
            .with_graceful_shutdown(async move { shutdown_http.cancelled().await })
            .await?;
        info!("HTTP server shutdown.");
        Ok(())
    }));

    // Join tasks and get errors
    for handle in tasks {
        match handle.await {
            Ok(Err(e)) => error!("{e}"),
            Err(e) => error!("{e}"),
            Ok(Ok(())) => info!("Task completed successfully."),
        }
    }
    info!("Server closed.");
    Ok(())
}
