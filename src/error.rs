use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{rate_limit::RateLimitDecision, response::ApiResponse};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("{0}")]
    BusinessRule(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Too many requests, please slow down")]
    RateLimited(RateLimitDecision),

    #[error("The assistant is not configured right now")]
    ServiceMisconfigured,

    #[error("The assistant is busy, please try again shortly")]
    ServiceBusy,

    #[error("A dependent service is unavailable, please try again")]
    ExternalService(String),

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::BusinessRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceMisconfigured | AppError::ServiceBusy => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::DbError(err) => tracing::error!(error = %err, "database error"),
            AppError::OrmError(err) => tracing::error!(error = %err, "orm error"),
            AppError::Internal(err) => tracing::error!(error = %err, "internal error"),
            AppError::ExternalService(detail) => {
                tracing::error!(detail = %detail, "external service error")
            }
            _ => {}
        }

        let body = ApiResponse::error(self.to_string());

        let headers = match &self {
            AppError::RateLimited(decision) => Some(decision.headers()),
            _ => None,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(headers) = headers {
            response.headers_mut().extend(headers);
        }
        response
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// A write that lost a race on a unique index is a conflict, not a 500.
pub fn conflict_on_unique(err: sea_orm::DbErr, message: impl Into<String>) -> AppError {
    match err.sql_err() {
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => AppError::Conflict(message.into()),
        _ => AppError::OrmError(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rule_errors_are_unprocessable() {
        let err = AppError::BusinessRule("This discount code has expired".into());
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.to_string(), "This discount code has expired");
    }

    #[test]
    fn external_errors_hide_details() {
        let err = AppError::ExternalService("paypal returned 500: boom".into());
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(!err.to_string().contains("boom"));
    }

    #[test]
    fn other_orm_errors_stay_server_errors() {
        let err = conflict_on_unique(sea_orm::DbErr::Custom("connection reset".into()), "taken");
        assert!(matches!(err, AppError::OrmError(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn misconfigured_and_busy_are_distinct() {
        assert_ne!(
            AppError::ServiceMisconfigured.to_string(),
            AppError::ServiceBusy.to_string()
        );
    }
}
