use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use common::delivery::{Deliverer, DeliveryError};
use common::vault::EncryptedVault;

/// Posts re-encrypted bundles to relying-party callbacks over HTTP
#[derive(Debug, Clone)]
pub struct HttpDeliverer {
    client: Client,
}

impl HttpDeliverer {
    /// `timeout` bounds each attempt, not the whole retry sequence
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

/// 4xx means the callback looked at the bundle and refused it, except for
/// the two statuses that ask us to come back later
fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    async fn deliver(&self, callback: &Url, bundle: &EncryptedVault) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(callback.clone())
            .json(bundle)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let reason = format!("callback answered {}", status);
        if is_permanent(status) {
            Err(DeliveryError::Permanent(reason))
        } else {
            Err(DeliveryError::Transient(reason))
        }
    }
}
