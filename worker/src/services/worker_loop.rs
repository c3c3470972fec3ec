use anyhow::Result;
use backend::usecases::payment_gateway::PaymentGateway;
use chrono::Utc;
use crates::domain::repositories::ledger::LedgerRepository;
use std::sync::Arc;
use tracing::{error, info};

use crate::usecases::stale_pending_sweep::StalePendingSweepUseCase;

pub async fn run_worker_loop<L, G>(usecase: Arc<StalePendingSweepUseCase<L, G>>) -> Result<()>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let interval = usecase.interval();
    info!(interval_secs = interval.as_secs(), "sweep: starting worker loop");

    loop {
        if let Err(e) = usecase.sweep_once(Utc::now()).await {
            error!(error = %e, "sweep: error while listing stale pending payments");
        }

        tokio::time::sleep(interval).await;
    }
}
