use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::instrument;

use crate::util::retry::Backoff;

/// Grace period before the first ping so the listener is up when it lands.
pub const INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Just under the 14 minute idle window free hosting tiers use to put a
/// service to sleep.
pub const PING_INTERVAL: Duration = Duration::from_secs(13 * 60 + 59);

const PING_TIMEOUT: Duration = Duration::from_secs(5);

fn ping_url(base: &str) -> String {
    format!("{base}/ping")
}

/// Periodic HEAD request against our own public URL. A failed round still
/// leaves the loop running; the next interval tick tries again fresh.
#[instrument(skip(base_url))]
pub fn spawn_keepalive(base_url: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(PING_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = ?e, "keep-alive client construction failed");
                return;
            }
        };

        let target = ping_url(&base_url);
        tracing::info!(target, "keep-alive loop starting");

        tokio::time::sleep(INITIAL_DELAY).await;

        let mut interval = tokio::time::interval(PING_INTERVAL);
        loop {
            interval.tick().await;

            let outcome = Backoff::new(3, Duration::from_secs(60))
                .run(|| {
                    let client = client.clone();
                    let target = target.clone();

                    async move {
                        let res = client.head(&target).send().await?;
                        res.error_for_status()?;
                        Ok::<_, reqwest::Error>(())
                    }
                })
                .await;

            match outcome {
                Ok(()) => tracing::debug!("keep-alive ping delivered"),
                Err(e) => tracing::warn!(error = ?e, "keep-alive round failed"),
            }
        }
    })
}
