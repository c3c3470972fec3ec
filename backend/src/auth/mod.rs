use std::sync::Arc;

use axum::{
    Json, async_trait,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use crates::domain::value_objects::payments::PaymentOwner;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{axum_http::error_responses::ErrorResponse, config::config_model::AuthSecret};

#[derive(Debug, Serialize, Deserialize)]
pub struct UserClaims {
    /// User id as a UUID string.
    pub sub: String,
    pub email: Option<String>,
    pub exp: usize,
}

/// Caller identity established by the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn owner(&self) -> PaymentOwner {
        PaymentOwner {
            user_id: self.user_id,
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token subject is not a user id")]
    InvalidSubject,
    #[error("authentication is not configured")]
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::NotConfigured => {
                error!("auth: AuthSecret extension missing from router");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::UNAUTHORIZED,
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            kind: "unauthorized",
            message: self.to_string(),
            payment_status: None,
        });

        (status, body).into_response()
    }
}

pub fn validate_user_jwt(token: &str, secret: &str) -> Result<UserClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    decode::<UserClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|token_data| token_data.claims)
        .map_err(|err| AuthError::InvalidToken(err.to_string()))
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let secret = parts
            .extensions
            .get::<Arc<AuthSecret>>()
            .cloned()
            .ok_or(AuthError::NotConfigured)?;

        let claims = validate_user_jwt(bearer_token(parts)?, &secret.jwt_secret).map_err(|err| {
            warn!(error = %err, "auth: rejected bearer token");
            err
        })?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;

        Ok(AuthUser {
            user_id,
            email: claims.email.filter(|email| !email.trim().is_empty()),
        })
    }
}
