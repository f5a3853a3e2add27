//! HTTP error responses.
//!
//! Every failure leaves the service as JSON `{"error": <message>, "kind":
//! <kind>}`. Request problems map to 4xx; conversion failures map to 500 and
//! carry the [`ErrorKind`](crate::error::ErrorKind) of the underlying [`ConvertError`].

use crate::convert::ConversionKind;
use crate::error::ConvertError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No `file` field, or a field without a usable filename.
    #[error("{0}")]
    MissingFile(String),

    /// The filename's extension does not match the route.
    #[error("'{file_name}' is not accepted by {kind}; expected {expected}")]
    UnsupportedFormat {
        kind: ConversionKind,
        file_name: String,
        expected: String,
    },

    /// Malformed multipart body, option value or download handle.
    #[error("{0}")]
    InvalidRequest(String),

    /// Unknown download handle or route.
    #[error("{0}")]
    NotFound(String),

    /// The request body exceeds the upload limit.
    #[error("Upload exceeds the limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The conversion or a store operation failed.
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl ApiError {
    /// Stable identifier placed in the `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::MissingFile(_) => "missing_file",
            ApiError::UnsupportedFormat { .. } => "unsupported_format",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::Convert(e) => e.kind().as_str(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFile(_)
            | ApiError::UnsupportedFormat { .. }
            | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Convert(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), detail = ?self, "Request failed: {}", self);
        } else {
            warn!(kind = self.kind(), detail = ?self, "Request rejected: {}", self);
        }

        let body = Json(ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        });
        (status, body).into_response()
    }
}
