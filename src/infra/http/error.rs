use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::origin::OriginError;
use crate::cache::{CacheError, WriteError};

/// Diagnostic attached to error responses and logged by [`super::middleware::log_responses`].
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const ORIGIN_UNAVAILABLE: &str = "origin_unavailable";
    pub const MUTATION_AMBIGUOUS: &str = "mutation_ambiguous";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            report: None,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized(message: &'static str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED, message, None)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    fn with_report(mut self, source: &'static str, error: &dyn StdError) -> Self {
        self.report = Some(ErrorReport::from_error(source, error));
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(report) = self.report {
            report.attach(&mut response);
        }
        response
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        let mapped = match &err {
            CacheError::Validation(inner) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Request could not be processed",
                Some(inner.to_string()),
            ),
            CacheError::NotFound { .. } => ApiError::not_found("Resource not found"),
            CacheError::OriginUnavailable { .. } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::ORIGIN_UNAVAILABLE,
                "Content temporarily unavailable",
                None,
            ),
        };
        mapped.with_report("infra::http::cache_error", &err)
    }
}

impl From<WriteError> for ApiError {
    fn from(err: WriteError) -> Self {
        let mapped = match &err {
            WriteError::Validation(inner) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Request could not be processed",
                Some(inner.to_string()),
            ),
            WriteError::MutationAmbiguous { .. } => ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                codes::MUTATION_AMBIGUOUS,
                "Outcome of the request is unknown",
                Some("Retry with the same idempotency key".to_string()),
            ),
            WriteError::Mutation {
                source: OriginError::NotFound { .. },
                ..
            } => ApiError::not_found("Resource not found"),
            WriteError::Mutation {
                source: OriginError::Invalid(message),
                ..
            } => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Request could not be processed",
                Some(message.clone()),
            ),
            WriteError::Mutation { .. } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::ORIGIN_UNAVAILABLE,
                "Service temporarily unavailable",
                None,
            ),
        };
        mapped.with_report("infra::http::write_error", &err)
    }
}
