use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

/// The two access-control failure paths are deliberately distinct:
/// unknown or non-admin principals are redirected to the login entry
/// point, while an authenticated admin lacking a permission is denied
/// outright.
#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("No authenticated session")]
    #[diagnostic(code(rosterly::authz::unauthenticated))]
    Unauthenticated,

    #[error("Principal may not access the admin panel")]
    #[diagnostic(code(rosterly::authz::panel_access))]
    PanelAccessDenied,

    #[error("Missing permission `{permission}`")]
    #[diagnostic(code(rosterly::authz::forbidden))]
    Forbidden { permission: String },

    #[error("Authorization failure: {0}")]
    #[diagnostic(code(rosterly::authz::internal))]
    Internal(String),
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        match self {
            // 302, not 307: callers depend on a plain Found redirect
            AuthzError::Unauthenticated | AuthzError::PanelAccessDenied => {
                (StatusCode::FOUND, [(header::LOCATION, "/login")]).into_response()
            }
            AuthzError::Forbidden { permission } => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "forbidden", "permission": permission })),
            )
                .into_response(),
            AuthzError::Internal(msg) => {
                tracing::error!(error = %msg, "authorization failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
