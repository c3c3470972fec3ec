pub mod payment_errors;
pub mod payment_gateway;
pub mod payment_initialization;
pub mod payment_queries;
pub mod payment_verification;
