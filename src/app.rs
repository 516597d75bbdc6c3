//! Application wiring: shared state, router, middleware (spec §5, §6, §9).

use std::sync::Arc;

use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::routing::{get, post};
use axum::{middleware, Router};
use sqlx::PgPool;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::channels;
use crate::config::Config;
use crate::health::health_handler;
use crate::hub::Hub;
use crate::kv::KvStore;
use crate::server_auth::require_auth;
use crate::stream::{count_handler, stream_handler};
use crate::subscription::SubscriptionIndex;
use crate::token::TokenValidator;
use crate::webhook::handle_webhook;

/// Process-wide shared state (spec §9: one K/V client, one DB pool, one
/// Hub, one Token Validator — all initialised at process start).
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub kv: KvStore,
    pub hub: Arc<Hub>,
    /// The bus pattern-subscriber task. Shutdown aborts it explicitly
    /// rather than relying on drop order (spec §9).
    pub bus_listener: Arc<tokio::task::JoinHandle<()>>,
    pub subscription_index: Arc<SubscriptionIndex>,
    pub token_validator: Arc<TokenValidator>,
    pub config: Arc<Config>,
}

/// Build the gateway's dependencies and axum router. Returns the router and
/// the shared state, so the caller can hold the hub across shutdown to
/// drain it (or, in tests, reach the DB/KV handles directly).
pub async fn build_app(config: Config) -> anyhow::Result<(Router, AppState)> {
    let db = crate::db::connect(&config.database_url).await?;
    let kv = KvStore::connect(&config.kv_url).await?;

    let hub = Hub::new(kv.clone());
    let bus_listener = Arc::new(hub.spawn_bus_listener());

    let token_validator = TokenValidator::new(
        config.jwks_url.clone(),
        config.token_issuer.clone(),
        config.token_audience.clone(),
    );
    token_validator.start().await?;

    let subscription_index = Arc::new(SubscriptionIndex::new(kv.clone()));

    let state = AppState {
        db,
        kv,
        hub: hub.clone(),
        bus_listener,
        subscription_index,
        token_validator,
        config: Arc::new(config.clone()),
    };

    let cors = build_cors(&config.allowed_origins);

    let authenticated_channel_routes = Router::new()
        .route(
            "/channels/me",
            get(channels::list_handler).post(channels::create_handler),
        )
        .route(
            "/channels/me/:id",
            axum::routing::put(channels::update_handler).delete(channels::delete_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let router = Router::new()
        .route("/events", get(stream_handler))
        .route("/events/count", get(count_handler))
        .route("/webhooks/sequin", post(handle_webhook))
        .route("/health", get(health_handler))
        .merge(authenticated_channel_routes)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    Ok((router, state))
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        cors.allow_origin(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

