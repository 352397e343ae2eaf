//! HTTP error mapping.
//!
//! Every failure leaves the API as `{"detail": "..."}` with a status code
//! chosen from the pipeline error it came from. Store failures are logged
//! here with their cause and reported to the caller as a bare 500; nobody
//! filing a pothole needs to read a Postgres error.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::{IntakeError, LifecycleError, NotificationError, StoreError, VoteError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{detail}")]
    Rejected { status: StatusCode, detail: String },

    #[error("{0}")]
    Spam(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Rejected { status, .. } => *status,
            Self::Spam(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "Store failure while serving request");
        ApiError::Internal
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        match e {
            IntakeError::Validation(v) => ApiError::Validation(v.to_string()),
            IntakeError::SpamRejected { .. } => {
                ApiError::Spam("Issue rejected: the report was flagged as spam".to_string())
            }
            IntakeError::NoAuthorityFound { category, district } => ApiError::NotFound(format!(
                "No authority found for category '{category}' in district '{district}'"
            )),
            // Already logged by the orchestrator.
            IntakeError::Persistence(_) => ApiError::Internal,
        }
    }
}

impl From<VoteError> for ApiError {
    fn from(e: VoteError) -> Self {
        match e {
            VoteError::IssueNotFound => ApiError::NotFound("Issue not found".to_string()),
            VoteError::Store(e) => e.into(),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::IssueNotFound => ApiError::NotFound("Issue not found".to_string()),
            LifecycleError::Forbidden => ApiError::Forbidden("Not authorized to update this issue".to_string()),
            LifecycleError::Store(e) => e.into(),
        }
    }
}

impl From<NotificationError> for ApiError {
    fn from(e: NotificationError) -> Self {
        match e {
            NotificationError::NotFound => ApiError::NotFound(e.to_string()),
            NotificationError::Store(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: rejection.body_text(),
        }
    }
}
