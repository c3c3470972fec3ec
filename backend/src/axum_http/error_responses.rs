use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crates::domain::value_objects::enums::payment_statuses::PaymentStatus;
use serde::Serialize;
use tracing::error;

use crate::usecases::payment_errors::PaymentError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            PaymentError::Internal(err) => {
                // Don't leak internal error detail to client
                error!(error = ?err, "http: internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            kind: self.kind(),
            message,
            payment_status: self.payment_status(),
        });

        (status, body).into_response()
    }
}

pub fn not_found_body(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            code: StatusCode::NOT_FOUND.as_u16(),
            kind: "not_found",
            message: message.to_string(),
            payment_status: None,
        }),
    )
}
