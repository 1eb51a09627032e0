use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(rosterly::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(rosterly::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(rosterly::serde))]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    #[diagnostic(code(rosterly::csv))]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(rosterly::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Validation failed")]
    #[diagnostic(code(rosterly::validation))]
    Validation(#[from] validator::ValidationErrors),

    #[error("Referential error: {0}")]
    #[diagnostic(
        code(rosterly::referential),
        help("State must belong to the selected country and city to the selected state")
    )]
    Referential(String),

    #[error("Duplicate: {0}")]
    #[diagnostic(code(rosterly::duplicate))]
    Duplicate(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(rosterly::not_found))]
    NotFound(String),

    #[error("Bad request: {0}")]
    #[diagnostic(code(rosterly::bad_request))]
    BadRequest(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error("{0}")]
    #[diagnostic(code(rosterly::other))]
    Other(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Authz(e) => e.into_response(),
            AppError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": "validation failed", "fields": errors })),
            )
                .into_response(),
            AppError::Referential(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": msg })),
            )
                .into_response(),
            AppError::Duplicate(msg) => {
                (StatusCode::CONFLICT, Json(json!({ "error": msg }))).into_response()
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
