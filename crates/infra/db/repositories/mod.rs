pub mod in_memory_ledger;
pub mod ledger;
