use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::credentials::AuthError;
use crate::repo::RepoError;
use crate::validation::FieldErrors;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<FieldErrors>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Validation failed")] Validation(FieldErrors),
    #[error("{0}")] BadRequest(String),
    #[error("{0}")] Unauthorized(&'static str),
    #[error("{0}")] Forbidden(&'static str),
    #[error("{0}")] NotFound(String),
    #[error("{0}")] Conflict(&'static str),
    #[error("Too many requests, try again later")] TooManyRequests,
    #[error("internal error")] Upstream,
}

impl ApiError {
    pub fn not_found(label: &str) -> Self {
        ApiError::NotFound(format!("{label} not found"))
    }
}

impl From<FieldErrors> for ApiError {
    fn from(e: FieldErrors) -> Self {
        ApiError::Validation(e)
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound("not found".into()),
            RepoError::Conflict => ApiError::Conflict("Resource already exists"),
            RepoError::Unavailable(cause) => {
                log::error!("store unavailable: {cause}");
                ApiError::Upstream
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredentials => ApiError::BadRequest("Email and password are required".into()),
            AuthError::UnknownUser | AuthError::InvalidCredentials => {
                log::warn!("failed login: {e}");
                ApiError::Unauthorized("Invalid credentials")
            }
            AuthError::Deactivated => {
                log::warn!("failed login: {e}");
                ApiError::Forbidden("Account is deactivated")
            }
            AuthError::Hashing(cause) => {
                log::error!("credential check failed: {cause}");
                ApiError::Upstream
            }
            AuthError::Store(e) => e.into(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let details = match self {
            ApiError::Validation(fields) => Some(fields.clone()),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string(), details })
    }
}
