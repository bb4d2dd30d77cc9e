use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

mod backend;
mod config;
mod error;
mod middleware;
mod models;
mod routes;
mod services;

use backend::{Backend, SupabaseClient};
use config::Config;
use services::busy::BusyRegistry;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub config: Arc<Config>,
    pub busy: BusyRegistry,
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    // --- Account routes (no auth required) ---
    let reset_routes = Router::new()
        .route("/", post(routes::password_reset::reset))
        .route("/session", post(routes::password_reset::check_session));

    let signup_routes = Router::new().route(
        "/",
        get(routes::signup::get_invitation).post(routes::signup::submit),
    );

    // --- Authenticated routes ---
    let upload_routes = Router::new()
        .route("/:orgId/uploads", get(routes::uploads::list_uploads))
        .route(
            "/:orgId/uploads/:uploadId",
            axum::routing::delete(routes::uploads::delete_upload),
        )
        .route(
            "/:orgId/uploads/:uploadId/reprocess",
            post(routes::uploads::reprocess),
        )
        .route(
            "/:orgId/uploads/:uploadId/dates",
            post(routes::uploads::assign_dates),
        )
        .route(
            "/:orgId/uploads/:uploadId/duplicates",
            post(routes::uploads::resolve_duplicates),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    // --- Compose full API ---
    let api = Router::new()
        .nest("/password-reset", reset_routes)
        .nest("/signup", signup_routes)
        .nest("/organizations", upload_routes);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health::health))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    if config.backend.anon_key.is_empty() {
        tracing::warn!("SUPABASE_ANON_KEY is not set; backend calls will be rejected");
    }

    let state = AppState {
        backend: Arc::new(SupabaseClient::new(&config.backend)),
        busy: BusyRegistry::new(),
        config: Arc::new(config),
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "upload portal API listening");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
