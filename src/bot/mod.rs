use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::instrument;

use crate::bot::telegram::TransportResult;
use crate::context::AppContext;

pub mod commands;
pub mod dispatch;
pub mod keepalive;
pub mod telegram;

/// Pause after a failed getUpdates round so a Bot API outage does not turn
/// the poll loop into a busy spin.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Brings the update feed up in one of two modes. With a public base URL the
/// Bot API pushes updates to our `/webhook` route and a keep-alive loop stops
/// the host from idling out; without one we long poll.
#[instrument(skip(ctx))]
pub async fn start(ctx: Arc<AppContext>) -> TransportResult<Vec<JoinHandle<()>>> {
    let me = ctx.bot.me().await?;
    tracing::info!(bot_id = me.id, username = ?me.username, "authenticated against bot api");

    match ctx.config.external_base_url.clone() {
        Some(base) => {
            ctx.bot.set_webhook(&format!("{base}/webhook")).await?;
            tracing::info!(base, "webhook registered");

            Ok(vec![keepalive::spawn_keepalive(base)])
        }
        None => {
            // a webhook left over from a previous deployment starves
            // getUpdates, so drop it before polling
            if let Err(e) = ctx.bot.delete_webhook().await {
                tracing::warn!(error = ?e, "failed to clear stale webhook");
            }

            tracing::info!("no public url configured, long polling for updates");
            Ok(vec![tokio::spawn(poll_loop(ctx))])
        }
    }
}

async fn poll_loop(ctx: Arc<AppContext>) {
    let mut offset = 0i64;

    loop {
        match ctx.bot.get_updates(offset).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    dispatch::handle_update(&ctx, update).await;
                }
            }
            Err(e) => {
                tracing::error!(error = ?e, "update poll failed");
                tokio::time::sleep(POLL_ERROR_PAUSE).await;
            }
        }
    }
}
