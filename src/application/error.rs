use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    application::{identity::IdentityError, repos::RepoError},
    cache::CacheError,
    domain::error::DomainError,
    events::EventBusError,
};

/// Error chain captured for the response logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Request-facing failure. Every variant carries a stable `code` such as
/// `SubscribeToNewsletter.Cooldown` and a human readable message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized: {message}")]
    Unauthorized { code: &'static str, message: String },
    #[error("validation failed: {message}")]
    Validation { code: &'static str, message: String },
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String },
    #[error("unexpected error: {message}")]
    Unexpected { code: &'static str, message: String },
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code,
            message: message.into(),
        }
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn unexpected(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unexpected {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized { code, .. }
            | AppError::Validation { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Unexpected { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Unauthorized { message, .. }
            | AppError::Validation { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Unexpected { message, .. } => message,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unexpected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let message = match &self {
            AppError::Unexpected { .. } => "Unexpected error occurred",
            other => other.message(),
        };
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));
        let mut response = (status, body).into_response();
        report.attach(&mut response);
        response
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { entity } => {
                Self::not_found("Domain.NotFound", format!("{entity} not found"))
            }
            DomainError::Validation { .. } => Self::validation("Domain.Validation", err.to_string()),
            DomainError::Invariant { .. } => Self::unexpected("Domain.Invariant", err.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate { .. } => Self::conflict("Repository.Duplicate", err.to_string()),
            RepoError::NotFound => Self::not_found("Repository.NotFound", err.to_string()),
            RepoError::Persistence(_) => Self::unexpected("Repository.Failure", err.to_string()),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        Self::unexpected("Cache.Failure", err.to_string())
    }
}

impl From<EventBusError> for AppError {
    fn from(err: EventBusError) -> Self {
        Self::unexpected("Events.Closed", err.to_string())
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidReturnUrl(_) => {
                Self::validation("Identity.ReturnUrl", err.to_string())
            }
            IdentityError::NoRequestContext | IdentityError::Configuration(_) => {
                Self::unexpected("Identity.Failure", err.to_string())
            }
        }
    }
}
