use crate::{auth::AuthUser, usecases::payment_queries::PaymentQueryUseCase};
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use crates::domain::repositories::ledger::LedgerRepository;
use std::sync::Arc;

use crate::usecases::payment_errors::PaymentError;

pub fn routes<L>(ledger_repo: Arc<L>) -> Router
where
    L: LedgerRepository + Send + Sync + 'static,
{
    let query_usecase = PaymentQueryUseCase::new(ledger_repo);

    Router::new()
        .route("/", get(list_transactions::<L>))
        .with_state(Arc::new(query_usecase))
}

pub async fn list_transactions<L>(
    State(query_usecase): State<Arc<PaymentQueryUseCase<L>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, PaymentError>
where
    L: LedgerRepository + Send + Sync + 'static,
{
    let transactions = query_usecase.list_transactions(auth.user_id).await?;

    Ok(Json(transactions))
}
