use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{client::ClientError, store::StoreError, verify::VerifyError};

/// Field name to message, one entry per failing form field.
pub type FieldErrors = BTreeMap<&'static str, String>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Forbidden")]
    Forbidden,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Write conflict: {key} kept changing across {attempts} attempts")]
    Conflict { key: &'static str, attempts: u32 },

    #[error("{0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match self {
            ProxyError::Forbidden => StatusCode::FORBIDDEN,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::MalformedPayload => StatusCode::BAD_REQUEST,
            ProxyError::Conflict { .. } => StatusCode::CONFLICT,
            ProxyError::Store(ref e) => {
                error!("Store fault: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Invalid form fields")]
    Validation(FieldErrors),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("{message}")]
    Upstream {
        field: &'static str,
        message: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("{0}")]
    Verification(String),

    #[error("Verification service error: {0}")]
    Verifier(#[from] VerifyError),
}

impl IntoResponse for SiteError {
    fn into_response(self) -> Response {
        match self {
            SiteError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "success": false, "errors": errors })),
            )
                .into_response(),
            SiteError::UnsupportedAction(action) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "errors": { "action": format!("Unsupported action: {action}") }
                })),
            )
                .into_response(),
            SiteError::Upstream {
                field,
                message,
                source,
            } => {
                error!("Comment store proxy call failed: {source}");

                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "success": false, "errors": { field: message } })),
                )
                    .into_response()
            }
            SiteError::Verification(message) => (
                StatusCode::FORBIDDEN,
                Json(json!({ "success": false, "message": message })),
            )
                .into_response(),
            SiteError::Verifier(e) => {
                error!("Challenge verification call failed: {e}");

                (
                    StatusCode::FORBIDDEN,
                    Json(json!({ "success": false, "message": "Verification failed" })),
                )
                    .into_response()
            }
        }
    }
}
