use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::account::AccountError;
use crate::auth::AuthError;
use crate::repo::RepoError;
use crate::storage::StoreError;
use crate::upload::UploadError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("{0}")] BadRequest(String),
    #[error("{0}")] Unauthorized(String),
    #[error("{0}")] Forbidden(String),
    #[error("payload too large")] TooLarge,
    #[error("backend not configured")] NotConfigured,
    #[error("upstream error")] Upstream,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::NotConfigured => ApiError::NotConfigured,
            RepoError::Unauthorized(m) => ApiError::Forbidden(m),
            RepoError::Remote(m) => {
                tracing::error!(error = %m, "backend request failed");
                ApiError::Upstream
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => ApiError::Conflict,
            StoreError::NotFound => ApiError::NotFound,
            StoreError::NotConfigured => ApiError::NotConfigured,
            StoreError::Other(m) => {
                tracing::error!(error = %m, "storage request failed");
                ApiError::Upstream
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotConfigured => ApiError::NotConfigured,
            AuthError::InvalidCredentials | AuthError::EmailNotConfirmed => ApiError::Unauthorized(e.to_string()),
            AuthError::Validation(m) => ApiError::BadRequest(m),
            AuthError::Remote(_) | AuthError::Transport(_) => {
                tracing::error!(error = %e, "auth service request failed");
                ApiError::Upstream
            }
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Validation(m) => ApiError::BadRequest(m),
            AccountError::NotFound => ApiError::NotFound,
            AccountError::Repo(e) => e.into(),
            AccountError::Store(e) => e.into(),
            AccountError::Auth(e) => e.into(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::NotAuthenticated => ApiError::Unauthorized(e.to_string()),
            UploadError::TooLarge { .. } => ApiError::TooLarge,
            UploadError::InvalidType(_) | UploadError::MissingTitle => ApiError::BadRequest(e.to_string()),
            UploadError::VideoUpload(e) => e.into(),
            UploadError::Metadata(e) => e.into(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string() })
    }
}
