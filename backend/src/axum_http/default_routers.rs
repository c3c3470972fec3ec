use axum::{http::StatusCode, response::IntoResponse};

use super::error_responses::not_found_body;

pub async fn not_found() -> impl IntoResponse {
    not_found_body("Not found")
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "All good!")
}
