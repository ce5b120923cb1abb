use std::time::Duration;

use super::{Deliverer, DeliveryError, DeliveryJob};

/// Bounded exponential backoff for callback delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound on any single wait
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Deliver one job, retrying transient failures
///
/// Returns the number of attempts it took. Permanent failures stop
/// immediately; exhausting `max_attempts` yields `DeliveryFailed`.
pub async fn deliver_with_retry<D: Deliverer + ?Sized>(
    deliverer: &D,
    policy: &RetryPolicy,
    job: &DeliveryJob,
) -> Result<u32, DeliveryError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match deliverer.deliver(&job.callback, &job.bundle).await {
            Ok(()) => return Ok(attempt),
            Err(DeliveryError::Transient(reason)) if attempt < max_attempts => {
                let wait = policy.backoff(attempt);
                tracing::warn!(
                    "DELIVERY: attempt {}/{} to {} failed ({}), retrying in {:?}",
                    attempt,
                    max_attempts,
                    super::redacted(&job.callback),
                    reason,
                    wait
                );
                tokio::time::sleep(wait).await;
            }
            Err(DeliveryError::Transient(reason)) | Err(DeliveryError::Permanent(reason)) => {
                return Err(DeliveryError::DeliveryFailed {
                    attempts: attempt,
                    reason,
                })
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vault::EncryptedVault;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;

    /// Fails transiently `failures` times, then succeeds
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Deliverer for Flaky {
        async fn deliver(&self, _callback: &Url, _bundle: &EncryptedVault) -> Result<(), DeliveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(DeliveryError::Transient("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug)]
    struct Rejecting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Deliverer for Rejecting {
        async fn deliver(&self, _callback: &Url, _bundle: &EncryptedVault) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::Permanent("400 Bad Request".into()))
        }
    }

    fn job() -> DeliveryJob {
        DeliveryJob {
            id: "alice".into(),
            callback: Url::parse("http://127.0.0.1:4001/decrypt/tok123").unwrap(),
            bundle: EncryptedVault::new(),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_secs(1));
        assert_eq!(policy.backoff(10), Duration::from_secs(10));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let deliverer = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let attempts = deliver_with_retry(&deliverer, &RetryPolicy::default(), &job())
            .await
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let deliverer = Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        let err = deliver_with_retry(&deliverer, &policy, &job())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::DeliveryFailed { attempts: 3, .. }));
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let deliverer = Rejecting {
            calls: AtomicU32::new(0),
        };
        let err = deliver_with_retry(&deliverer, &RetryPolicy::default(), &job())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::DeliveryFailed { attempts: 1, .. }));
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 1);
    }
}
