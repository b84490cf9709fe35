use atendepsi::config::{Config, PersistenceMode};
use atendepsi::db::{PostgrestTokenStore, SqliteTokenStore, TokenStore};
use atendepsi::identity::SupabaseIdentity;
use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        listen_addr = %cfg.listen_addr,
        persistence = ?cfg.token_persistence_mode,
        database_url = %cfg.database_url,
        proxy = %cfg.proxy.as_deref().unwrap_or("<none>"),
        loglevel = %cfg.loglevel,
    );

    let missing = cfg.missing_google_vars();
    if !missing.is_empty() {
        warn!(?missing, "Google OAuth is not configured; Google routes will answer 503");
    }
    if cfg.refresh_service_key.is_none() {
        warn!(
            "REFRESH_SERVICE_KEY unset: /api/integrations/google/refresh is open and must be restricted by network policy"
        );
    }

    let http = cfg.build_http_client()?;

    let (Some(supabase_url), Some(anon_key)) =
        (cfg.supabase_url.clone(), cfg.supabase_anon_key.clone())
    else {
        return Err("SUPABASE_URL and SUPABASE_ANON_KEY are required to authenticate callers".into());
    };
    let identity = Arc::new(SupabaseIdentity::new(http.clone(), &supabase_url, anon_key.clone()));

    let store: Arc<dyn TokenStore> = match cfg.token_persistence_mode {
        PersistenceMode::Server => Arc::new(SqliteTokenStore::connect(&cfg.database_url).await?),
        PersistenceMode::ClientRelay => Arc::new(PostgrestTokenStore::new(
            http.clone(),
            &supabase_url,
            anon_key,
            &cfg.google_tokens_table,
        )),
    };

    let addr = cfg.listen_addr.clone();
    let state = atendepsi::router::AppState::new(cfg, http, identity, store);
    let app = atendepsi::router::atendepsi_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
