use backend::config::config_model::{Database, Paystack};

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub database: Database,
    pub paystack: Paystack,
    pub sweep: Sweep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sweep {
    /// Seconds between passes.
    pub interval_secs: u64,
    pub batch_size: i64,
    /// A pending payment older than this is re-verified.
    pub stale_after_minutes: i64,
}

impl Default for Sweep {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            batch_size: 50,
            stale_after_minutes: 1440,
        }
    }
}
