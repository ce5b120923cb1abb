use axum::extract::{Json, Path, State as AxumState};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use common::envelope::Envelope;
use common::protocol::{ProtocolError, Registration};
use common::recovery::BackupPayload;
use common::vault::{EncryptedVault, FieldMap};

use super::client::{endpoint, ApiRequest};
use super::{Ack, TagsResponse};
use crate::http_server::{ApiResponse, HandlerError};
use crate::State;

/// Register an identity key; the envelope is signed by that key
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub id: String,
    pub envelope: Envelope<Registration>,
}

pub async fn register(
    AxumState(state): AxumState<State>,
    Path(id): Path<String>,
    Json(envelope): Json<Envelope<Registration>>,
) -> Result<ApiResponse<Ack>, HandlerError> {
    state.custodian().register(&id, envelope).await?;
    Ok(ApiResponse::ok(Ack::default()))
}

impl ApiRequest for RegisterRequest {
    type Response = Ack;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(endpoint(base_url, &["user", &self.id]))
            .json(&self.envelope)
    }
}

#[derive(Debug, Clone)]
pub struct IdentityRequest {
    pub id: String,
}

pub async fn identity(
    AxumState(state): AxumState<State>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Registration>, HandlerError> {
    let public_key = state.custodian().identity(&id).await?;
    Ok(ApiResponse::ok(Registration { public_key }))
}

impl ApiRequest for IdentityRequest {
    type Response = Registration;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, &["user", &self.id]))
    }
}

#[derive(Debug, Clone)]
pub struct GetDataRequest {
    pub id: String,
}

pub async fn get_data(
    AxumState(state): AxumState<State>,
    Path(id): Path<String>,
) -> Result<ApiResponse<EncryptedVault>, HandlerError> {
    Ok(ApiResponse::ok(state.custodian().data(&id).await?))
}

impl ApiRequest for GetDataRequest {
    type Response = EncryptedVault;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, &["user", &self.id, "data"]))
    }
}

/// Replace the stored ciphertext units of the tags in the envelope
#[derive(Debug, Clone)]
pub struct SetDataRequest {
    pub id: String,
    pub envelope: Envelope<EncryptedVault>,
}

pub async fn set_data(
    AxumState(state): AxumState<State>,
    Path(id): Path<String>,
    Json(envelope): Json<Envelope<EncryptedVault>>,
) -> Result<ApiResponse<TagsResponse>, HandlerError> {
    let tags = state.custodian().set_data(&id, envelope).await?;
    Ok(ApiResponse::ok(TagsResponse { tags }))
}

impl ApiRequest for SetDataRequest {
    type Response = TagsResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(endpoint(base_url, &["user", &self.id, "data"]))
            .json(&self.envelope)
    }
}

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub id: String,
    pub envelope: Envelope<BackupPayload>,
}

pub async fn backup(
    AxumState(state): AxumState<State>,
    Path(id): Path<String>,
    Json(envelope): Json<Envelope<BackupPayload>>,
) -> Result<ApiResponse<Ack>, HandlerError> {
    state.custodian().backup(&id, envelope).await?;
    Ok(ApiResponse::ok(Ack::default()))
}

impl ApiRequest for BackupRequest {
    type Response = Ack;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(endpoint(base_url, &["user", &self.id, "backup"]))
            .json(&self.envelope)
    }
}

/// Ask for a one-time code on a contact recorded in the latest backup
#[derive(Debug, Clone)]
pub struct SendCodeRequest {
    pub id: String,
    pub contact: String,
}

pub async fn send_code(
    AxumState(state): AxumState<State>,
    Path((id, email)): Path<(String, String)>,
) -> Result<ApiResponse<Ack>, HandlerError> {
    state.custodian().send_code(&id, &email).await?;
    Ok(ApiResponse::ok(Ack::default()))
}

impl ApiRequest for SendCodeRequest {
    type Response = Ack;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, &["user", &self.id, "code", &self.contact]))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codes {
    pub codes: Vec<String>,
}

/// `{payload: {codes}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverBody {
    pub payload: Codes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverResponse {
    pub data: Vec<FieldMap>,
}

#[derive(Debug, Clone)]
pub struct RecoverRequest {
    pub id: String,
    pub codes: Vec<String>,
}

pub async fn recover(
    AxumState(state): AxumState<State>,
    Path(id): Path<String>,
    Json(body): Json<RecoverBody>,
) -> Result<ApiResponse<RecoverResponse>, HandlerError> {
    let bundle = state
        .custodian()
        .recover_by_code(&id, &body.payload.codes)
        .await?;
    let data = state
        .agents()
        .open_bundle(&bundle)
        .await
        .map_err(ProtocolError::from)?;
    Ok(ApiResponse::ok(RecoverResponse { data }))
}

impl ApiRequest for RecoverRequest {
    type Response = RecoverResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        let body = RecoverBody {
            payload: Codes { codes: self.codes },
        };
        client
            .post(endpoint(base_url, &["user", &self.id, "code"]))
            .json(&body)
    }
}
