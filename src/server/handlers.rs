//! API handlers
//!
//! Thin translation between the HTTP surface and the engine: parse,
//! delegate, wrap in the envelope. No business logic lives here.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{timeout, Duration};

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::monitor::{self, dca, Monitor};
use crate::pipeline;
use crate::pools::{PoolFilter, SortKey};
use crate::submit::SubmitMode;
use crate::types::{
    Distribution, Preferences, RangeShape, Recipient, Strategy, TelegramTarget, TipUrgency, Venue,
    WebhookTarget,
};

use super::RequestId;

/// Wrap a handler result in the response envelope
fn respond<T: Serialize>(request_id: &RequestId, result: Result<T>) -> Response {
    match result {
        Ok(data) => (
            StatusCode::OK,
            Json(json!({ "data": data, "requestId": request_id.0 })),
        )
            .into_response(),
        Err(error) => {
            let status =
                StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut body = json!({
                "error": { "code": error.code(), "message": error.to_string() },
                "requestId": request_id.0,
            });
            // Structured hint for escalation exhaustion
            if let Error::SlippageExhausted { last_bps } = &error {
                body["error"]["details"] = json!({ "lastTriedBps": last_bps });
            }
            (status, Json(body)).into_response()
        }
    }
}

// ---- Wallets ----

#[derive(Deserialize)]
pub struct CreateWalletBody {
    pub label: Option<String>,
}

pub async fn create_wallet(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<CreateWalletBody>,
) -> Response {
    respond(&rid, ctx.wallets.create(body.label.as_deref()).await)
}

pub async fn get_wallet(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> Response {
    respond(&rid, ctx.wallets.load(&id).await)
}

pub async fn wallet_balance(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> Response {
    let result = async {
        let lamports = ctx.wallets.balance(&id).await?;
        Ok(json!({ "lamports": lamports, "sol": lamports as f64 / 1e9 }))
    }
    .await;
    respond(&rid, result)
}

// ---- Pools ----

#[derive(Deserialize)]
pub struct PoolsQuery {
    pub min_tvl: Option<f64>,
    pub max_risk: Option<u8>,
    pub venue: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_pools(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Query(query): Query<PoolsQuery>,
) -> Response {
    let result = async {
        let filter = PoolFilter {
            min_tvl_usd: query.min_tvl,
            max_risk: query.max_risk,
            venue: query.venue.as_deref().map(Venue::parse).transpose()?,
            sort: query
                .sort
                .as_deref()
                .map(SortKey::parse)
                .transpose()?
                .unwrap_or_default(),
            limit: query.limit.unwrap_or(20),
        };
        ctx.pools.list_top(&filter).await
    }
    .await;
    respond(&rid, result)
}

#[derive(Deserialize)]
pub struct BestPoolQuery {
    pub token_a: String,
    pub token_b: String,
}

pub async fn best_pool(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Query(query): Query<BestPoolQuery>,
) -> Response {
    respond(
        &rid,
        ctx.pools
            .best_pool_for_pair(&query.token_a, &query.token_b)
            .await,
    )
}

pub async fn pool_details(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path((venue, address)): Path<(String, String)>,
) -> Response {
    let result = async {
        let venue = Venue::parse(&venue)?;
        ctx.pools.describe(venue, &address).await
    }
    .await;
    respond(&rid, result)
}

// ---- LP execution ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBody {
    pub wallet: String,
    pub venue: String,
    pub pool: String,
    pub collateral_mint: Option<String>,
    pub amount: u64,
    pub shape: Option<RangeShape>,
    pub distribution: Option<Distribution>,
    pub slippage_bps: Option<u16>,
    pub urgency: Option<TipUrgency>,
    pub mode: Option<SubmitMode>,
}

impl OpenBody {
    fn strategy(&self) -> Result<Strategy> {
        if self.amount == 0 {
            return Err(Error::Validation("amount must be positive".into()));
        }
        Ok(Strategy {
            venue: Venue::parse(&self.venue)?,
            pool: self.pool.clone(),
            collateral_mint: self
                .collateral_mint
                .clone()
                .unwrap_or_else(|| crate::pools::tokens::WSOL_MINT.to_string()),
            collateral_amount: self.amount,
            shape: self.shape.unwrap_or(RangeShape::Concentrated),
            distribution: self.distribution.unwrap_or_default(),
            slippage_bps: self.slippage_bps.unwrap_or(300),
            urgency: self.urgency.unwrap_or(TipUrgency::Fast),
        })
    }
}

/// Track the new position after a landed open; best effort
async fn track_new_position(ctx: &AppContext, wallet_id: &str, position_id: &Option<String>) {
    let Some(position_id) = position_id else { return };
    let Ok(profile) = ctx.wallets.load(wallet_id).await else {
        return;
    };
    if let Ok(position) = ctx.indexer.find(&profile.address, position_id).await {
        let _ = monitor::track(&ctx.store, wallet_id, &position).await;
    }
}

pub async fn lp_open(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<OpenBody>,
) -> Response {
    let result = async {
        let strategy = body.strategy()?;
        let mode = body.mode.unwrap_or(SubmitMode::Bundle);
        let receipt = pipeline::atomic_open(&ctx, &body.wallet, strategy, mode).await?;
        track_new_position(&ctx, &body.wallet, &receipt.position_id).await;
        Ok(receipt)
    }
    .await;
    respond(&rid, result)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDirectBody {
    #[serde(flatten)]
    pub open: OpenBody,
    pub amount_a: u64,
    pub amount_b: u64,
}

pub async fn lp_open_direct(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<OpenDirectBody>,
) -> Response {
    let result = async {
        let strategy = body.open.strategy()?;
        let mode = body.open.mode.unwrap_or(SubmitMode::Bundle);
        let receipt = pipeline::execute_open(
            &ctx,
            &body.open.wallet,
            strategy,
            body.amount_a,
            body.amount_b,
            mode,
        )
        .await?;
        track_new_position(&ctx, &body.open.wallet, &receipt.position_id).await;
        Ok(receipt)
    }
    .await;
    respond(&rid, result)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawBody {
    pub wallet: String,
    pub position: String,
    pub convert_to: Option<String>,
    pub urgency: Option<TipUrgency>,
    pub mode: Option<SubmitMode>,
}

pub async fn lp_withdraw(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<WithdrawBody>,
) -> Response {
    let result = async {
        let receipt = pipeline::withdraw(
            &ctx,
            &body.wallet,
            &body.position,
            body.convert_to.clone(),
            body.urgency.unwrap_or(TipUrgency::Fast),
            body.mode.unwrap_or(SubmitMode::Bundle),
        )
        .await?;
        let _ = monitor::untrack(&ctx.store, &body.wallet, &body.position).await;
        Ok(receipt)
    }
    .await;
    respond(&rid, result)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceBody {
    pub wallet: String,
    pub position: String,
    pub urgency: Option<TipUrgency>,
}

pub async fn lp_rebalance(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<RebalanceBody>,
) -> Response {
    let result = async {
        let receipt = pipeline::rebalance(
            &ctx,
            &body.wallet,
            &body.position,
            body.urgency.unwrap_or(TipUrgency::Fast),
        )
        .await?;
        let _ = monitor::untrack(&ctx.store, &body.wallet, &body.position).await;
        track_new_position(&ctx, &body.wallet, &receipt.position_id).await;
        Ok(receipt)
    }
    .await;
    respond(&rid, result)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectBody {
    pub wallet: String,
    pub position: String,
    pub mode: Option<SubmitMode>,
}

pub async fn lp_collect(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<CollectBody>,
) -> Response {
    respond(
        &rid,
        pipeline::collect_fees(
            &ctx,
            &body.wallet,
            &body.position,
            body.mode.unwrap_or(SubmitMode::Sequential),
        )
        .await,
    )
}

// ---- Positions ----

pub async fn list_positions(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(wallet): Path<String>,
) -> Response {
    // Accepts either a wallet id or a raw address
    let result = async {
        let address = match ctx.wallets.load(&wallet).await {
            Ok(profile) => profile.address,
            Err(Error::NotFound(_)) => wallet.clone(),
            Err(e) => return Err(e),
        };
        ctx.indexer.list(&address).await
    }
    .await;
    respond(&rid, result)
}

// ---- Oracle ----

pub async fn oracle_price(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(mint): Path<String>,
) -> Response {
    respond(&rid, ctx.oracle.price(&mint).await)
}

#[derive(Deserialize)]
pub struct PricesBody {
    pub mints: Vec<String>,
}

pub async fn oracle_prices(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<PricesBody>,
) -> Response {
    let result = async {
        if body.mints.is_empty() || body.mints.len() > 20 {
            return Err(Error::Validation(
                "between 1 and 20 mints per request".into(),
            ));
        }
        ctx.oracle.prices(&body.mints).await
    }
    .await;
    respond(&rid, result)
}

// ---- DCA ----

pub async fn dca_create(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<dca::CreateSchedule>,
) -> Response {
    let result = async {
        // The wallet must exist before money moves on its behalf
        ctx.wallets.load(&body.wallet).await?;
        dca::create(&ctx.store, body).await
    }
    .await;
    respond(&rid, result)
}

pub async fn dca_list(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(wallet): Path<String>,
) -> Response {
    respond(&rid, dca::list_by_wallet(&ctx.store, &wallet).await)
}

pub async fn dca_pause(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> Response {
    respond(&rid, dca::pause(&ctx.store, &id).await)
}

pub async fn dca_resume(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> Response {
    respond(&rid, dca::resume(&ctx.store, &id).await)
}

pub async fn dca_cancel(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> Response {
    respond(&rid, dca::cancel(&ctx.store, &id).await)
}

pub async fn dca_history(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> Response {
    respond(&rid, dca::history(&ctx.store, &id).await)
}

// ---- Notifications ----

pub async fn register_recipient(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Json(recipient): Json<Recipient>,
) -> Response {
    let result = async {
        ctx.notifier.register(&recipient).await?;
        Ok(recipient)
    }
    .await;
    respond(&rid, result)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecipientBody {
    pub telegram: Option<TelegramTarget>,
    pub webhook: Option<WebhookTarget>,
    pub preferences: Option<Preferences>,
}

pub async fn update_recipient(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
    Path(wallet): Path<String>,
    Json(body): Json<UpdateRecipientBody>,
) -> Response {
    let result = async {
        let mut recipient = ctx
            .notifier
            .recipient(&wallet)
            .await?
            .ok_or_else(|| Error::NotFound(format!("recipient {}", wallet)))?;
        if body.telegram.is_some() {
            recipient.telegram = body.telegram;
        }
        if body.webhook.is_some() {
            recipient.webhook = body.webhook;
        }
        if let Some(preferences) = body.preferences {
            recipient.preferences = preferences;
        }
        ctx.notifier.register(&recipient).await?;
        Ok(recipient)
    }
    .await;
    respond(&rid, result)
}

// ---- Worker ----

pub async fn worker_status(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
) -> Response {
    let result = async {
        let state: Option<crate::types::WorkerState> =
            ctx.store.get(crate::store::keys::WORKER_STATE).await?;
        let logs: Vec<monitor::LogEntry> = ctx
            .store
            .list_range(crate::store::keys::WORKER_LOGS, 0, 19)
            .await?;
        Ok(json!({ "state": state, "recentLogs": logs }))
    }
    .await;
    respond(&rid, result)
}

pub async fn worker_check(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
) -> Response {
    respond(&rid, Monitor::new(ctx.clone()).tick().await)
}

// ---- Health ----

pub async fn health(
    State(ctx): State<Arc<AppContext>>,
    Extension(rid): Extension<RequestId>,
) -> Response {
    let probe = Duration::from_secs(5);
    let rpc_ok = timeout(probe, ctx.rpc.get_latest_blockhash())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    let store_ok = timeout(probe, ctx.store.ping())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

    respond::<serde_json::Value>(
        &rid,
        Ok(json!({
            "status": if rpc_ok && store_ok { "ok" } else { "degraded" },
            "rpc": rpc_ok,
            "store": store_ok,
            "storeBackend": if ctx.store.is_memory() { "memory" } else { "redis" },
            "venues": ctx.adapters.enabled(),
        })),
    )
}
