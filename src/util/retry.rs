use std::future::Future;
use std::time::Duration;

/// Bounded retry with a doubling delay between attempts. The last error is
/// returned untouched once the attempt budget runs out.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    attempts: u32,
    initial: Duration,
}

impl Backoff {
    pub const fn new(attempts: u32, initial: Duration) -> Self {
        Self { attempts, initial }
    }

    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        let mut delay = self.initial;
        let mut attempt = 1u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = ?e,
                        "attempt failed, backing off"
                    );

                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(3, Duration::from_millis(100));

        let result: Result<u32, &str> = backoff
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { if n < 3 { Err("not yet") } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_budget() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(3, Duration::from_millis(100));

        let result: Result<(), &str> = backoff
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still broken") }
            })
            .await;

        assert_eq!(result, Err("still broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_retries_nothing() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(5, Duration::from_secs(60));

        let result: Result<(), &str> = backoff
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
