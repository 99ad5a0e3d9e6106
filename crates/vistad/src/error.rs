//! HTTP mapping of [`VistaError`].

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use vista_core::VistaError;

/// A [`VistaError`] rendered as `{"error": {kind, message, retryable}}`.
#[derive(Debug)]
pub struct ApiError(pub VistaError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            VistaError::Input(_) => StatusCode::BAD_REQUEST,
            VistaError::AccessDenied | VistaError::Expired => StatusCode::FORBIDDEN,
            VistaError::NotFound(_) => StatusCode::NOT_FOUND,
            VistaError::Build(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VistaError::Vcs(_) => StatusCode::BAD_GATEWAY,
            VistaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<VistaError> for ApiError {
    fn from(err: VistaError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(VistaError::Input(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(VistaError::Input(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        } else {
            tracing::debug!(kind = self.0.kind(), error = %self.0, "request rejected");
        }
        let body = json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
                "retryable": self.0.is_retryable(),
            }
        });
        (status, Json(body)).into_response()
    }
}
