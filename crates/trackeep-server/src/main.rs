mod config;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use trackeep_api::middleware::decode_token;
use trackeep_api::state::{AppState, AppStateInner};
use trackeep_crypto::VaultCipher;
use trackeep_gateway::{Gateway, connection};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackeep=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(trackeep_db::Database::open(&config.db_path)?);

    // Shared state
    let gateway = Gateway::new(db, config.gateway.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        gateway,
        jwt_secret: config.jwt_secret.clone(),
        vault: VaultCipher::new(&config.vault_key),
    });

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state.clone());

    let app = Router::new()
        .merge(trackeep_api::routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Trackeep server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Authenticate at the upgrade (`/gateway?token=<jwt>`) and resolve the
/// conversations this connection may subscribe to.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = params.get("token").ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = decode_token(&state.jwt_secret, token).ok_or(StatusCode::UNAUTHORIZED)?;

    let allowed = state
        .gateway
        .allowed_conversations(claims.sub)
        .await
        .map_err(|e| {
            error!("Failed to resolve conversations for user {}: {}", claims.sub, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, gateway, claims.sub, allowed)
    }))
}
