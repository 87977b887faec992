use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coze_client::{CozeClient, RetryPolicy};
use policy_common::Config;
use storage_client::StorageClient;

mod auth;
mod compare;
mod db;
mod error;
mod export;
mod rest;

use auth::SessionService;
use db::ComparisonStore;

pub struct AppState {
    pub config: Config,
    pub store: ComparisonStore,
    pub coze: CozeClient,
    pub storage: StorageClient,
    pub sessions: SessionService,
    pub rate_limiter: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl AppState {
    /// Wire clients from config around an existing pool.
    pub fn new(config: Config, pool: sqlx::PgPool) -> Result<Self> {
        let policy = RetryPolicy {
            max_attempts: config.coze_max_attempts,
            delay: Duration::from_millis(config.coze_retry_delay_ms),
        };
        let coze = match config.coze_timeout_secs {
            Some(secs) => CozeClient::with_timeout(
                &config.coze_workflow_url,
                config.coze_api_token.clone(),
                Duration::from_secs(secs),
            )?,
            None => CozeClient::new(&config.coze_workflow_url, config.coze_api_token.clone()),
        }
        .with_policy(policy);

        let storage = StorageClient::new(
            &config.storage_base_url,
            &config.storage_bucket,
            config.storage_token.clone(),
            &config.storage_public_url,
        );

        Ok(Self {
            store: ComparisonStore::new(pool),
            coze,
            storage,
            sessions: SessionService::new(&config.session_secret),
            rate_limiter: Mutex::new(HashMap::new()),
            config,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Session
        .route("/api/login", post(rest::session::api_login))
        .route("/api/logout", post(rest::session::api_logout))
        .route("/api/me", get(rest::session::api_me))
        // Uploads
        .route(
            "/api/uploads",
            post(rest::uploads::api_upload)
                .layer(DefaultBodyLimit::max(rest::uploads::MAX_UPLOAD_BYTES)),
        )
        .route("/api/uploads/fetch", post(rest::uploads::api_fetch_to_store))
        // Comparisons
        .route(
            "/api/comparisons",
            get(rest::api_list_comparisons).post(rest::api_create_comparison),
        )
        .route(
            "/api/comparisons/{id}",
            get(rest::api_get_comparison).delete(rest::api_delete_comparison),
        )
        .route("/api/comparisons/{id}/content", put(rest::api_update_content))
        .route("/api/comparisons/{id}/review", put(rest::api_set_review))
        .route("/api/comparisons/{id}/export.md", get(rest::api_export_markdown))
        .route("/api/comparisons/{id}/export.pdf", get(rest::api_export_pdf))
        .with_state(state)
        // CORS
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Logging layer: method + path + status + latency only
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("policy_api=info".parse()?))
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    db::ensure_schema(&pool).await?;

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let state = Arc::new(AppState::new(config, pool)?);
    let app = build_router(state);

    info!("Policy comparison API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
