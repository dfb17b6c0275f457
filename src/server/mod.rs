//! HTTP API
//!
//! JSON over HTTP with a uniform envelope: every response carries either
//! `data` or `error {code, message}` plus the request id echoed in
//! `X-Request-ID`.

mod handlers;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::context::AppContext;
use crate::error::Result;

/// Request id propagated through extensions into the envelope
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Wallets
        .route("/wallets", post(handlers::create_wallet))
        .route("/wallets/:id", get(handlers::get_wallet))
        .route("/wallets/:id/balance", get(handlers::wallet_balance))
        // Pools
        .route("/pools", get(handlers::list_pools))
        .route("/pools/best", get(handlers::best_pool))
        .route("/pools/:venue/:address", get(handlers::pool_details))
        // LP execution
        .route("/lp/open", post(handlers::lp_open))
        .route("/lp/open-direct", post(handlers::lp_open_direct))
        .route("/lp/withdraw", post(handlers::lp_withdraw))
        .route("/lp/rebalance", post(handlers::lp_rebalance))
        .route("/lp/collect", post(handlers::lp_collect))
        // Positions
        .route("/positions/:wallet", get(handlers::list_positions))
        // Oracle
        .route("/oracle/price/:mint", get(handlers::oracle_price))
        .route("/oracle/prices", post(handlers::oracle_prices))
        // DCA
        .route("/dca", post(handlers::dca_create))
        .route("/dca/wallet/:wallet", get(handlers::dca_list))
        .route("/dca/:id/pause", post(handlers::dca_pause))
        .route("/dca/:id/resume", post(handlers::dca_resume))
        .route("/dca/:id", delete(handlers::dca_cancel))
        .route("/dca/:id/history", get(handlers::dca_history))
        // Notifications
        .route("/recipients", post(handlers::register_recipient))
        .route("/recipients/:wallet", patch(handlers::update_recipient))
        // Worker
        .route("/worker/status", get(handlers::worker_status))
        .route("/worker/check", post(handlers::worker_check))
        // Health
        .route("/health", get(handlers::health))
        .with_state(ctx)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(request_id_middleware)),
        )
}

/// Serve the API until the process stops
pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let bind = ctx.config.server.bind_address.clone();
    let app = router(ctx);
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| crate::error::Error::Config(format!("bind {}: {}", bind, e)))?;
    info!("API listening on {}", bind);
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::Internal(format!("server: {}", e)))?;
    Ok(())
}
