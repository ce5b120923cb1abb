use axum::extract::{Json, Path, State as AxumState};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use common::crypto::{Generators, GroupPublicKey};
use common::delivery::redacted;
use common::envelope::Envelope;
use common::protocol::{ProtocolError, TaggedReKey};

use super::client::{endpoint, ApiRequest};
use super::TagsResponse;
use crate::http_server::{ApiResponse, HandlerError};
use crate::State;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorsRequest;

pub async fn generators(AxumState(state): AxumState<State>) -> ApiResponse<Generators> {
    ApiResponse::ok(state.custodian().generators())
}

impl ApiRequest for GeneratorsRequest {
    type Response = Generators;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, &["auth", "generators"]))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PksRequest;

/// Public keys re-encryption keys may target for recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PksResponse {
    pub pks: Vec<GroupPublicKey>,
}

pub async fn pks(AxumState(state): AxumState<State>) -> ApiResponse<PksResponse> {
    ApiResponse::ok(PksResponse {
        pks: state.custodian().recovery_agents(),
    })
}

impl ApiRequest for PksRequest {
    type Response = PksResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, &["auth", "pks"]))
    }
}

/// Signed re-encryption keys for a get request, delivered to `callback`
#[derive(Debug, Clone)]
pub struct ReEncryptRequest {
    pub id: String,
    pub callback: Url,
    pub envelope: Envelope<TaggedReKey>,
}

/// `redirect` is the relying party's callback URL, percent-encoded into a
/// single path segment
pub async fn re_encrypt(
    AxumState(state): AxumState<State>,
    Path((id, redirect)): Path<(String, String)>,
    Json(envelope): Json<Envelope<TaggedReKey>>,
) -> Result<ApiResponse<TagsResponse>, HandlerError> {
    let callback = Url::parse(&redirect)
        .map_err(|e| ProtocolError::InvalidRequest(format!("invalid callback url: {}", e)))?;
    tracing::info!("REENCRYPT: request from {} for {}", id, redacted(&callback));
    let tags = state.custodian().re_encrypt(&id, callback, envelope).await?;
    Ok(ApiResponse::ok(TagsResponse { tags }))
}

impl ApiRequest for ReEncryptRequest {
    type Response = TagsResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        let url = endpoint(
            base_url,
            &["auth", "reEncrypt", &self.id, self.callback.as_str()],
        );
        client.post(url).json(&self.envelope)
    }
}
