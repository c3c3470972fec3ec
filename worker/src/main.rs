use anyhow::Result;
use backend::usecases::payment_verification::VerificationLease;
use crates::{
    infra::db::{postgres::postgres_connection, repositories::ledger::LedgerPostgres},
    payments::paystack_client::{PaystackClient, PaystackClientConfig},
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use worker::{
    config, services::worker_loop, usecases::stale_pending_sweep::StalePendingSweepUseCase,
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Worker exited with error: {:#}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("worker")?;

    let dotenvy_env = config::config_loader::load()?;
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_connections,
    )?;
    info!("Postgres connection has been established");

    let ledger_repo = Arc::new(LedgerPostgres::new(Arc::new(postgres_pool)));
    let gateway_timeout = Duration::from_secs(dotenvy_env.paystack.timeout_secs);
    let gateway = Arc::new(PaystackClient::new(PaystackClientConfig {
        secret_key: dotenvy_env.paystack.secret_key.clone(),
        base_url: dotenvy_env.paystack.base_url.clone(),
        timeout: gateway_timeout,
    })?);

    let sweep_usecase = Arc::new(
        StalePendingSweepUseCase::new(ledger_repo, gateway, dotenvy_env.sweep.clone())
            .with_lease(VerificationLease::covering(gateway_timeout)),
    );

    let sweep_loop = tokio::spawn(worker_loop::run_worker_loop(sweep_usecase));

    tokio::select! {
        result = sweep_loop => result??,
        _ = tokio::signal::ctrl_c() => info!("Received ctrl+C signal"),
    };

    Ok(())
}
