use crate::{
    auth::AuthUser,
    usecases::{
        payment_errors::PaymentError, payment_gateway::PaymentGateway,
        payment_initialization::PaymentInitializationUseCase,
        payment_queries::PaymentQueryUseCase,
        payment_verification::{PaymentVerificationUseCase, VerificationLease},
    },
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use crates::domain::{
    repositories::ledger::LedgerRepository,
    value_objects::payments::{InsertPaymentModel, VerifyPaymentQuery},
};
use std::sync::Arc;
use uuid::Uuid;

pub struct PaymentsState<L, G>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub initialization: PaymentInitializationUseCase<L, G>,
    pub verification: PaymentVerificationUseCase<L, G>,
    pub queries: PaymentQueryUseCase<L>,
}

pub fn routes<L, G>(
    ledger_repo: Arc<L>,
    gateway: Arc<G>,
    callback_base_url: String,
    lease: VerificationLease,
) -> Router
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let state = PaymentsState {
        initialization: PaymentInitializationUseCase::new(
            Arc::clone(&ledger_repo),
            Arc::clone(&gateway),
            callback_base_url,
        ),
        verification: PaymentVerificationUseCase::new(Arc::clone(&ledger_repo), gateway)
            .with_lease(lease),
        queries: PaymentQueryUseCase::new(ledger_repo),
    };

    Router::new()
        .route(
            "/",
            get(list_payments::<L, G>).post(initialize_payment::<L, G>),
        )
        .route("/:payment_id", get(get_payment::<L, G>))
        .route("/:payment_id/verify", get(verify_payment::<L, G>))
        .with_state(Arc::new(state))
}

pub async fn initialize_payment<L, G>(
    State(state): State<Arc<PaymentsState<L, G>>>,
    auth: AuthUser,
    Json(insert_payment_model): Json<InsertPaymentModel>,
) -> Result<impl IntoResponse, PaymentError>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let initialized = state
        .initialization
        .initialize_payment(auth.owner(), insert_payment_model)
        .await?;

    Ok((StatusCode::CREATED, Json(initialized)))
}

pub async fn list_payments<L, G>(
    State(state): State<Arc<PaymentsState<L, G>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, PaymentError>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let payments = state.queries.list_payments(auth.user_id).await?;

    Ok(Json(payments))
}

pub async fn get_payment<L, G>(
    State(state): State<Arc<PaymentsState<L, G>>>,
    auth: AuthUser,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, PaymentError>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let payment = state.queries.get_payment(payment_id, auth.user_id).await?;

    Ok(Json(payment))
}

/// Gateway redirect target. The reference arrives as `trxref` and `reference`.
pub async fn verify_payment<L, G>(
    State(state): State<Arc<PaymentsState<L, G>>>,
    auth: AuthUser,
    Path(payment_id): Path<Uuid>,
    Query(query): Query<VerifyPaymentQuery>,
) -> Result<impl IntoResponse, PaymentError>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let outcome = state
        .verification
        .verify_payment(payment_id, auth.user_id, query.into_reference())
        .await?;

    Ok(Json(outcome))
}
