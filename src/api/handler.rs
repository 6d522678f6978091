use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use http::StatusCode;
use serde::Serialize;
use tracing::instrument;

use crate::bot::dispatch;
use crate::bot::telegram::Update;
use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: &'static str,
    pub timestamp: String,
}

/// Liveness plus a connectivity probe. The process answers even when the
/// store is down, so a dead database degrades the report instead of the
/// endpoint.
#[instrument(skip(ctx))]
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthReport> {
    let database = database_state(crate::db::probe(&ctx.pool).await);

    Json(HealthReport {
        status: "ok",
        database,
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Human-readable status line for anyone opening the base URL.
pub async fn index() -> &'static str {
    "XP bot is up and running"
}

/// Wire values monitoring keys on; not free to change.
fn database_state(reachable: bool) -> &'static str {
    if reachable { "connected" } else { "disconnected" }
}

/// Keep-alive target. Body-less; HEAD requests hit it too.
pub async fn ping() -> StatusCode {
    StatusCode::OK
}

/// Inbound update push. Acked immediately and processed off the request
/// path, since a slow handler makes the Bot API re-deliver the update.
#[instrument(skip(ctx, update), fields(update_id = update.update_id))]
pub async fn webhook(
    State(ctx): State<Arc<AppContext>>,
    Json(update): Json<Update>,
) -> StatusCode {
    tokio::spawn(async move {
        dispatch::handle_update(&ctx, update).await;
    });

    StatusCode::OK
}
