use axum::http::StatusCode;
use crates::domain::value_objects::{
    amounts::AmountError, enums::payment_statuses::PaymentStatus,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
    #[error("invalid payment method: {0}")]
    InvalidPaymentMethod(&'static str),
    #[error("payment not found")]
    NotFound,
    #[error("verification request carries no gateway reference")]
    MissingReference,
    #[error("gateway reference does not match this payment")]
    ReferenceMismatch,
    #[error("another verification of this payment is still in progress")]
    VerificationInProgress,
    #[error("payment gateway error: {detail}")]
    Gateway {
        payment_status: PaymentStatus,
        detail: String,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::InvalidAmount(_)
            | PaymentError::InvalidPaymentMethod(_)
            | PaymentError::MissingReference => StatusCode::BAD_REQUEST,
            PaymentError::NotFound => StatusCode::NOT_FOUND,
            PaymentError::ReferenceMismatch | PaymentError::VerificationInProgress => {
                StatusCode::CONFLICT
            }
            PaymentError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentError::InvalidAmount(_) => "invalid_amount",
            PaymentError::InvalidPaymentMethod(_) => "invalid_payment_method",
            PaymentError::NotFound => "not_found",
            PaymentError::MissingReference => "missing_reference",
            PaymentError::ReferenceMismatch => "reference_mismatch",
            PaymentError::VerificationInProgress => "verification_in_progress",
            PaymentError::Gateway { .. } => "gateway_error",
            PaymentError::Internal(_) => "internal",
        }
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        match self {
            PaymentError::Gateway { payment_status, .. } => Some(*payment_status),
            PaymentError::VerificationInProgress => Some(PaymentStatus::Pending),
            _ => None,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, PaymentError>;
