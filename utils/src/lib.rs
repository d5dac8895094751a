use std::{
    fmt::Display,
    future::Future,
    time::{Duration, SystemTime},
};

use tracing::warn;

pub fn get_epoch_time_in_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Failure of a single guarded store call.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    #[error("{op} timed out after {timeout:?}")]
    TimedOut { op: String, timeout: Duration },

    #[error("{op} failed: {error}")]
    Failed { op: String, error: E },
}

impl<E> AttemptError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

async fn attempt_with_timeout<T, E, Fut>(
    op: &str,
    timeout: Duration,
    fut: Fut,
) -> Result<T, AttemptError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(AttemptError::Failed {
            op: op.to_string(),
            error,
        }),
        Err(_) => Err(AttemptError::TimedOut {
            op: op.to_string(),
            timeout,
        }),
    }
}

/// Runs a store call bounded by `timeout`, retrying it exactly once when the
/// first attempt times out or fails.
///
/// Callers must fold expected outcomes (a missing key, a lost race) into
/// `Ok` so that only transient faults reach the retry.
pub async fn retry_once<T, E, F, Fut>(
    op: &str,
    timeout: Duration,
    mut attempt: F,
) -> Result<T, AttemptError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match attempt_with_timeout(op, timeout, attempt()).await {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(
                op,
                timed_out = err.is_timeout(),
                error = %err,
                "store call failed, retrying once"
            );
            attempt_with_timeout(op, timeout, attempt()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn test_retry_once_recovers_from_single_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<u32, AttemptError<String>> =
            retry_once("head", Duration::from_secs(1), || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("connection reset".to_string())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_gives_up_after_second_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<u32, AttemptError<String>> =
            retry_once("read_range", Duration::from_secs(1), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("throttled".to_string())
                }
            })
            .await;

        assert!(matches!(result, Err(AttemptError::Failed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_once_times_out_hung_calls() {
        let result: Result<u32, AttemptError<String>> =
            retry_once("get", Duration::from_millis(50), || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(1)
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
    }
}
