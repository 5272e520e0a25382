//! TourGuard - Authentication & Session Security Service
//! Mission: Guard every tour-booking account with rotating tokens and a full audit trail

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tourguard::auth::{
    api::{self, AppState},
    middleware::{authorization_guard, request_logging, GuardState},
    AuthStore, MemoryRateLimitBackend, ProbabilityRotation, RateLimiter, SecurityEventLogger,
    SessionManager, TokenService,
};
use tourguard::config::AuthConfig;

#[derive(Parser, Debug)]
#[command(name = "tourguard", about = "Authentication & session security service")]
struct Args {
    /// Listen address, overrides PORT from the environment.
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database path, overrides TOURGUARD_DB.
    #[arg(long, env = "TOURGUARD_DB")]
    db: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tourguard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = AuthConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }
    let config = Arc::new(config);

    info!(
        db = %config.db_path,
        production = config.production,
        "Starting TourGuard"
    );

    let store = Arc::new(AuthStore::new(&config.db_path).context("Failed to open auth store")?);
    let limiter = Arc::new(
        RateLimiter::new(Arc::new(MemoryRateLimitBackend::new()))
            .with_policy("login", config.login_limit)
            .with_policy("refresh", config.refresh_limit)
            .with_policy("verify", config.verify_limit),
    );
    let events = Arc::new(SecurityEventLogger::new(Arc::clone(&store)));
    let tokens = Arc::new(TokenService::new(
        config.jwt_secret.clone(),
        config.access_ttl_minutes,
        config.refresh_ttl_days,
        Arc::clone(&store),
        Arc::clone(&limiter),
        Arc::clone(&events),
        Arc::new(ProbabilityRotation::new(config.rotation_probability)),
    ));
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&events),
    ));

    let state = AppState {
        config: Arc::clone(&config),
        store,
        tokens: Arc::clone(&tokens),
        sessions,
        events: Arc::clone(&events),
        limiter: Arc::clone(&limiter),
    };
    let guard = GuardState { tokens, events };

    // Periodic sweep of stale rate-limit counters.
    {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(10 * 60));
            loop {
                tick.tick().await;
                limiter.cleanup();
            }
        });
    }

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/auth/login", post(api::login))
        .route("/auth/refresh", post(api::refresh))
        .route(
            "/auth/verify-email",
            post(api::verify_email).get(api::verify_email_link),
        )
        .route("/auth/logout", post(api::logout))
        .route("/auth/logout-all", post(api::logout_all))
        .route("/auth/sessions", get(api::list_sessions))
        .route("/auth/sessions/:id", delete(api::terminate_session))
        .route("/auth/security-events", get(api::security_events))
        .route("/auth/security-stats", get(api::security_stats))
        .route("/auth/me", get(api::me))
        .layer(middleware::from_fn_with_state(guard, authorization_guard))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("TourGuard listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
