use reqwest::{header::HeaderMap, header::HeaderValue, Client};
use url::Url;

use common::crypto::Generators;

use super::error::ApiError;
use super::ApiRequest;
use crate::http_server::api::auth::GeneratorsRequest;
use crate::http_server::{ApiResponse, ErrorPayload};

#[derive(Debug, Clone)]
pub struct CustodianClient {
    pub remote: Url,
    client: Client,
}

impl CustodianClient {
    pub fn new(remote: &Url) -> Result<Self, ApiError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder().default_headers(default_headers).build()?;

        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    /// Send a request and unwrap the `{ok, payload}` body
    pub async fn call<T: ApiRequest>(&self, request: T) -> Result<T::Response, ApiError> {
        let request_builder = request.build_request(&self.remote, &self.client);
        let response = request_builder.send().await?;

        let status = response.status();
        if status.is_success() {
            let body = response.json::<ApiResponse<T::Response>>().await?;
            Ok(body.payload)
        } else {
            let text = response.text().await?;
            let message = serde_json::from_str::<ApiResponse<ErrorPayload>>(&text)
                .map(|body| body.payload.message)
                .unwrap_or(text);
            Err(ApiError::HttpStatus(status, message))
        }
    }

    /// Fetch the generators and check they agree with ours
    pub async fn check_generators(&self) -> Result<Generators, ApiError> {
        let remote = self.call(GeneratorsRequest).await?;
        let local = Generators::current();
        if !local.matches(&remote) {
            return Err(ApiError::HttpStatus(
                reqwest::StatusCode::CONFLICT,
                format!(
                    "custodian generators {}/{} do not match local {}/{}",
                    remote.g, remote.h, local.g, local.h
                ),
            ));
        }
        Ok(remote)
    }

    /// Get the base URL for API requests
    pub fn base_url(&self) -> &Url {
        &self.remote
    }
}
