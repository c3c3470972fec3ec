pub mod payments;
pub mod transactions;
