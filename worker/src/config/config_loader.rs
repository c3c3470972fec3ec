use anyhow::{Result, bail};
use backend::config::config_loader::{load_database, load_paystack, parsed_or};

use super::config_model::{DotEnvyConfig, Sweep};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    Ok(DotEnvyConfig {
        database: load_database()?,
        paystack: load_paystack()?,
        sweep: load_sweep()?,
    })
}

pub fn load_sweep() -> Result<Sweep> {
    let defaults = Sweep::default();
    let sweep = Sweep {
        interval_secs: parsed_or("SWEEP_INTERVAL_SECS", defaults.interval_secs)?,
        batch_size: parsed_or("SWEEP_BATCH_SIZE", defaults.batch_size)?,
        stale_after_minutes: parsed_or("SWEEP_STALE_AFTER_MINUTES", defaults.stale_after_minutes)?,
    };

    if sweep.interval_secs == 0 {
        bail!("SWEEP_INTERVAL_SECS must be greater than zero");
    }
    if sweep.batch_size <= 0 {
        bail!("SWEEP_BATCH_SIZE must be greater than zero");
    }
    if sweep.stale_after_minutes < 0 {
        bail!("SWEEP_STALE_AFTER_MINUTES must not be negative");
    }

    Ok(sweep)
}
