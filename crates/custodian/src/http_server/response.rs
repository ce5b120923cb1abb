use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use common::delivery::DeliveryError;
use common::protocol::ProtocolError;

/// `{ok, payload}` wrapper around every API response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub payload: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(payload: T) -> Self {
        Self { ok: true, payload }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Payload of a failed response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// A protocol error on its way out of a handler
#[derive(Debug)]
pub struct HandlerError(pub ProtocolError);

impl From<ProtocolError> for HandlerError {
    fn from(e: ProtocolError) -> Self {
        Self(e)
    }
}

impl HandlerError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ProtocolError::MalformedCiphertext(_)
            | ProtocolError::InvalidRequest(_)
            | ProtocolError::UnknownTag(_) => StatusCode::BAD_REQUEST,
            ProtocolError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProtocolError::UnknownIdentity(_) | ProtocolError::NotFound(_) => StatusCode::NOT_FOUND,
            ProtocolError::Conflict(_) => StatusCode::CONFLICT,
            ProtocolError::DecryptionFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ProtocolError::Delivery(DeliveryError::QueueFull) => StatusCode::SERVICE_UNAVAILABLE,
            ProtocolError::Delivery(_)
            | ProtocolError::Storage(_)
            | ProtocolError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("API ERROR: {}", self.0);
        } else {
            tracing::warn!("API REJECTED ({}): {}", status, self.0);
        }
        let body = ApiResponse {
            ok: false,
            payload: ErrorPayload {
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ProtocolError::MalformedCiphertext("x".into()), StatusCode::BAD_REQUEST),
            (ProtocolError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ProtocolError::UnknownIdentity("x".into()), StatusCode::NOT_FOUND),
            (ProtocolError::Conflict("x".into()), StatusCode::CONFLICT),
            (ProtocolError::DecryptionFailed, StatusCode::UNPROCESSABLE_ENTITY),
            (
                ProtocolError::Delivery(DeliveryError::QueueFull),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ProtocolError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(HandlerError(error).status(), status);
        }
    }
}
