pub mod payment_statuses;
pub mod transaction_statuses;
