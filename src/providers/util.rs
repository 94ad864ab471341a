use crate::core::FetchError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff applied when the remote service rate-limits us.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Retries an async fetch while it reports [`FetchError::RateLimited`].
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `backoff`: Initial delay (doubled after every retry) and total attempt budget
///
/// # Returns
/// The first non rate-limited outcome. When the budget runs out the rate limit
/// is surfaced as [`FetchError::Transient`], so it never leaks to callers.
pub async fn with_backoff<F, Fut, T>(mut operation: F, backoff: Backoff) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 1;
    let mut delay = backoff.initial_delay;
    loop {
        match operation().await {
            Err(FetchError::RateLimited { player }) => {
                if attempt >= backoff.max_attempts {
                    return Err(FetchError::transient(
                        &player,
                        Some(429),
                        format!("still rate limited after {attempt} attempts"),
                    ));
                }
                debug!(
                    "Attempt {}/{} rate limited for '{}'. Retrying in {:?}...",
                    attempt, backoff.max_attempts, player, delay
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn rate_limited() -> FetchError {
        FetchError::RateLimited {
            player: "Zezima".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_until_success() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let backoff = Backoff::new(Duration::from_millis(100), 5);

        let result = with_backoff(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let mut calls = calls.lock().unwrap();
                    calls.push(Instant::now());
                    if calls.len() <= 3 {
                        Err(rate_limited())
                    } else {
                        Ok(42)
                    }
                }
            },
            backoff,
        )
        .await;

        assert_eq!(result, Ok(42));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4, "one initial attempt plus three retries");

        let delays: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exhaustion_becomes_transient() {
        let attempts = Arc::new(Mutex::new(0));
        let backoff = Backoff::new(Duration::from_millis(10), 3);

        let result: Result<(), FetchError> = with_backoff(
            || {
                let attempts = Arc::clone(&attempts);
                async move {
                    *attempts.lock().unwrap() += 1;
                    Err(rate_limited())
                }
            },
            backoff,
        )
        .await;

        assert_eq!(*attempts.lock().unwrap(), 3);
        match result {
            Err(FetchError::Transient { status, .. }) => assert_eq!(status, Some(429)),
            other => panic!("expected transient error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let attempts = Arc::new(Mutex::new(0));
        let backoff = Backoff::new(Duration::from_millis(10), 5);

        let result: Result<(), FetchError> = with_backoff(
            || {
                let attempts = Arc::clone(&attempts);
                async move {
                    *attempts.lock().unwrap() += 1;
                    Err(FetchError::NotFound {
                        player: "Nobody".to_string(),
                    })
                }
            },
            backoff,
        )
        .await;

        assert_eq!(*attempts.lock().unwrap(), 1);
        assert!(result.unwrap_err().is_not_found());
    }
}
