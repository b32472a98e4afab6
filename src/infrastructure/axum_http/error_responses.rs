use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

/// Uniform error body for every router. Internal detail stays in the
/// logs; clients only ever see the message chosen at the usecase
/// boundary.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "Internal server error".to_string()
    } else {
        message.into()
    };

    (
        status,
        Json(ErrorResponse {
            code: status.as_u16(),
            message,
        }),
    )
        .into_response()
}
