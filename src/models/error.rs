use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Machine-readable failure category, embedded in failed readings and
/// error responses so clients can branch without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Timeout,
    ProbeFailure,
    TotalScanFailure,
    NotFound,
    DuplicateId,
    InvalidSample,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("probe exceeded {timeout_ms}ms deadline")]
    Timeout { timeout_ms: u64 },

    #[error("probe failure: {0}")]
    ProbeFailure(String),

    #[error("all probes failed, no snapshot produced")]
    TotalScanFailure,

    #[error("snapshot not found: {0}")]
    NotFound(Uuid),

    #[error("snapshot id already present: {0}")]
    DuplicateId(Uuid),

    #[error("invalid traffic sample: {0}")]
    InvalidSample(String),
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Timeout { .. } => ErrorKind::Timeout,
            ScanError::ProbeFailure(_) => ErrorKind::ProbeFailure,
            ScanError::TotalScanFailure => ErrorKind::TotalScanFailure,
            ScanError::NotFound(_) => ErrorKind::NotFound,
            ScanError::DuplicateId(_) => ErrorKind::DuplicateId,
            ScanError::InvalidSample(_) => ErrorKind::InvalidSample,
        }
    }
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::DuplicateId => StatusCode::CONFLICT,
            ErrorKind::InvalidSample => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout | ErrorKind::ProbeFailure | ErrorKind::TotalScanFailure => {
                StatusCode::BAD_GATEWAY
            }
        };

        (
            status,
            Json(json!({
                "error": self.kind(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}
