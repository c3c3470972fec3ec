use crate::{
    axum_http::{default_routers, routers},
    config::config_model::{AuthSecret, DotEnvyConfig},
    usecases::{payment_gateway::PaymentGateway, payment_verification::VerificationLease},
};
use anyhow::Result;
use axum::{
    Extension, Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    domain::repositories::ledger::LedgerRepository,
    infra::db::{postgres::postgres_connection::PgPoolSquad, repositories::ledger::LedgerPostgres},
    payments::paystack_client::{PaystackClient, PaystackClientConfig},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

/// API routes without the transport layers, so tests can drive it directly.
pub fn api_router<L, G>(
    auth_secret: Arc<AuthSecret>,
    ledger_repo: Arc<L>,
    gateway: Arc<G>,
    callback_base_url: String,
    lease: VerificationLease,
) -> Router
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/payments",
            routers::payments::routes(
                Arc::clone(&ledger_repo),
                gateway,
                callback_base_url,
                lease,
            ),
        )
        .nest(
            "/api/v1/transactions",
            routers::transactions::routes(ledger_repo),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(Extension(auth_secret))
}

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let ledger_repo = Arc::new(LedgerPostgres::new(Arc::clone(&db_pool)));
    let gateway_timeout = Duration::from_secs(config.paystack.timeout_secs);
    let gateway = Arc::new(PaystackClient::new(PaystackClientConfig {
        secret_key: config.paystack.secret_key.clone(),
        base_url: config.paystack.base_url.clone(),
        timeout: gateway_timeout,
    })?);

    let app = api_router(
        Arc::new(config.auth.clone()),
        ledger_repo,
        gateway,
        config.paystack.callback_base_url.clone(),
        VerificationLease::covering(gateway_timeout),
    )
    .layer(TimeoutLayer::new(Duration::from_secs(
        config.backend_server.timeout,
    )))
    .layer(RequestBodyLimitLayer::new(
        (config.backend_server.body_limit * 1024 * 1024).try_into()?,
    ))
    .layer(
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_origin(Any), // TODO Restrict to the frontend origin once it is deployed
    )
    .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = ?err, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = ?err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
