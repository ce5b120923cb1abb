use std::time::Duration;

use axum::extract::{Json, Path, Query, State as AxumState};
use serde::{Deserialize, Serialize};

use common::request::AppInfo;
use common::vault::{EncryptedVault, FieldMap};
use custodian::http_server::{ApiResponse, HandlerError};

use crate::State;

/// The session key `/appInfo` handed out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionQuery {
    pub session: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuery {
    pub session: String,
    /// Long-poll for up to this long; answer immediately when absent
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResponse {
    pub data: Option<FieldMap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub logged_in: bool,
}

/// Field names a delivery added to its session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedResponse {
    pub fields: Vec<String>,
}

pub async fn app_info(
    AxumState(state): AxumState<State>,
) -> Result<ApiResponse<AppInfo>, HandlerError> {
    Ok(ApiResponse::ok(state.app().app_info().await?))
}

pub async fn data(
    AxumState(state): AxumState<State>,
    Query(query): Query<DataQuery>,
) -> Result<ApiResponse<DataResponse>, HandlerError> {
    let data = match query.wait_ms {
        Some(wait_ms) => {
            let timeout = Duration::from_millis(wait_ms).min(state.max_wait());
            state.app().wait(&query.session, timeout).await?
        }
        None => state.app().data(&query.session).await?,
    };
    Ok(ApiResponse::ok(DataResponse { data }))
}

pub async fn status(
    AxumState(state): AxumState<State>,
    Query(query): Query<SessionQuery>,
) -> Result<ApiResponse<StatusResponse>, HandlerError> {
    let logged_in = state.app().status(&query.session).await?;
    Ok(ApiResponse::ok(StatusResponse { logged_in }))
}

/// End a session; later deliveries for its callback token are refused
pub async fn logout(
    AxumState(state): AxumState<State>,
    Query(query): Query<SessionQuery>,
) -> Result<ApiResponse<StatusResponse>, HandlerError> {
    let existed = state.app().logout(&query.session).await?;
    tracing::info!("APP: session ended (existed: {})", existed);
    Ok(ApiResponse::ok(StatusResponse { logged_in: false }))
}

/// Callback the custodian delivers re-encrypted bundles to
pub async fn decrypt(
    AxumState(state): AxumState<State>,
    Path(token): Path<String>,
    Json(bundle): Json<EncryptedVault>,
) -> Result<ApiResponse<ConsumedResponse>, HandlerError> {
    let fields = state.app().consume(&token, &bundle).await?;
    Ok(ApiResponse::ok(ConsumedResponse {
        fields: fields.into_keys().collect(),
    }))
}
