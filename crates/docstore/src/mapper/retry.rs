//! Retrying units of work which ran into optimistic concurrency conflicts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{ConcurrencyError, StorageResult};

/// Runs `task` until it succeeds, fails with an error other than a conflict, or runs out
/// of attempts.
///
/// Between attempts the task sleeps `remaining attempts x factor`, shifted by a random
/// jitter of up to one factor in either direction. The task is expected to re-read the
/// entities it modifies on each attempt.
pub async fn retry_on_conflict<T, F, Fut>(config: &RetryConfig, mut task: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match task().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_concurrency_conflict() => {
                if attempt >= max_attempts {
                    tracing::warn!("Giving up after {} conflicting attempts: {}", attempt, e);
                    return Err(ConcurrencyError::RetriesExhausted {
                        attempts: attempt,
                        reason: e.to_string(),
                    }
                    .into());
                }

                let pause = backoff(max_attempts - attempt, config.backoff_factor_ms);
                tracing::debug!(
                    "Attempt {} ran into a conflict, retrying in {:?}: {}",
                    attempt,
                    pause,
                    e
                );
                tokio::time::sleep(pause).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff(remaining_attempts: u32, factor_ms: u64) -> Duration {
    let base = i64::from(remaining_attempts) * factor_ms as i64;
    let jitter = if factor_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(-(factor_ms as i64)..=factor_ms as i64)
    };
    Duration::from_millis((base + jitter).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::error::{ProtocolError, StorageError};

    fn conflict() -> StorageError {
        ConcurrencyError::OptimisticLockFailure {
            reason: "version conflict".to_string(),
        }
        .into()
    }

    #[test]
    fn test_backoff_bounds() {
        for _ in 0..100 {
            let pause = backoff(2, 50);
            assert!(pause >= Duration::from_millis(50));
            assert!(pause <= Duration::from_millis(150));
        }
        assert_eq!(backoff(3, 0), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_second_attempt() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result = assert_ok!(
            retry_on_conflict(&RetryConfig::default(), || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(conflict())
                } else {
                    Ok("done")
                }
            })
            .await
        );

        assert_eq!(result, "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let err = assert_err!(
            retry_on_conflict(&RetryConfig::default(), || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(conflict())
            })
            .await
        );

        assert!(matches!(
            err,
            StorageError::Concurrency(ConcurrencyError::RetriesExhausted { attempts: 3, .. })
        ));
        assert!(!err.is_concurrency_conflict());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_abort() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let err = retry_on_conflict(&RetryConfig::default(), || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StorageError::from(ProtocolError::NoResponse))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Protocol(ProtocolError::NoResponse)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
