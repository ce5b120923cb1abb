//! Callback delivery queue
//!
//! Re-encrypted bundles leave the custodian through this queue. The request
//! that produced a bundle is answered as soon as the job is queued; a
//! background worker posts the bundle to the relying party's callback with
//! bounded exponential backoff. A job that exhausts its attempts is dropped
//! and logged, and the relying party's session simply stays pending.

mod retry;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

pub use retry::{deliver_with_retry, RetryPolicy};

use crate::vault::EncryptedVault;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth another attempt: network failure, timeout, 5xx
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Retrying cannot help: the callback rejected the bundle
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
    #[error("delivery failed after {attempts} attempt(s): {reason}")]
    DeliveryFailed { attempts: u32, reason: String },
    #[error("delivery queue is full")]
    QueueFull,
    #[error("delivery worker has been stopped")]
    Stopped,
}

/// A transformed bundle waiting to be posted to a callback
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// The user the bundle was produced for
    pub id: String,
    pub callback: Url,
    pub bundle: EncryptedVault,
}

/// Where a callback points, without the path that carries its session token
pub fn redacted(callback: &Url) -> String {
    callback.origin().ascii_serialization()
}

/// Posts a bundle to a callback URL, once
#[async_trait]
pub trait Deliverer: Send + Sync + Debug + 'static {
    async fn deliver(&self, callback: &Url, bundle: &EncryptedVault) -> Result<(), DeliveryError>;
}

/// Configuration for the delivery queue
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Maximum number of queued jobs. None means unbounded.
    pub max_queue_size: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: Some(1000),
            retry: RetryPolicy::default(),
        }
    }
}

/// Cloneable handle for queueing delivery jobs
#[derive(Debug, Clone)]
pub struct DeliveryDispatcher {
    tx: flume::Sender<DeliveryJob>,
}

impl DeliveryDispatcher {
    /// Create a dispatcher and the receiver its worker drains
    pub fn new(config: &DeliveryConfig) -> (Self, JobReceiver) {
        let (tx, rx) = match config.max_queue_size {
            Some(size) => {
                tracing::info!("Creating bounded delivery queue with size {}", size);
                flume::bounded(size)
            }
            None => {
                tracing::info!("Creating unbounded delivery queue");
                flume::unbounded()
            }
        };
        (Self { tx }, JobReceiver { rx })
    }

    /// Queue a job without waiting
    pub fn dispatch(&self, job: DeliveryJob) -> Result<(), DeliveryError> {
        tracing::info!(
            "DELIVERY: queueing {} tag(s) for {} -> {}",
            job.bundle.len(),
            job.id,
            redacted(&job.callback)
        );
        self.tx.try_send(job).map_err(|e| match e {
            flume::TrySendError::Full(_) => DeliveryError::QueueFull,
            flume::TrySendError::Disconnected(_) => DeliveryError::Stopped,
        })
    }

    /// Number of jobs waiting for the worker
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Receiving end of the delivery queue
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<DeliveryJob>,
}

impl JobReceiver {
    /// Try to receive a job without blocking
    pub fn try_recv(&self) -> Option<DeliveryJob> {
        self.rx.try_recv().ok()
    }

    /// Convert to an async stream for the worker loop
    pub fn into_async(self) -> flume::r#async::RecvStream<'static, DeliveryJob> {
        self.rx.into_stream()
    }
}

/// Drain the delivery queue until every dispatcher is dropped
///
/// Each job runs in its own task so a slow callback never holds up the rest.
///
/// ```ignore
/// let (dispatcher, receiver) = DeliveryDispatcher::new(&config);
/// tokio::spawn(run_worker(Arc::new(deliverer), config.retry, receiver));
/// ```
pub async fn run_worker<D: Deliverer>(deliverer: Arc<D>, policy: RetryPolicy, receiver: JobReceiver) {
    use futures::StreamExt;

    tracing::info!("Starting delivery worker");
    let mut jobs = receiver.into_async();

    while let Some(job) = jobs.next().await {
        let deliverer = deliverer.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            match deliver_with_retry(deliverer.as_ref(), &policy, &job).await {
                Ok(attempts) => {
                    tracing::info!(
                        "DELIVERY: delivered bundle for {} to {} after {} attempt(s)",
                        job.id,
                        redacted(&job.callback),
                        attempts
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "DELIVERY: abandoning bundle for {} to {}: {}",
                        job.id,
                        redacted(&job.callback),
                        e
                    );
                }
            }
        });
    }

    tracing::info!("Delivery queue closed, shutting down worker");
}
