use std::{collections::HashMap, sync::Arc};

use crates::domain::{
    entities::transactions::TransactionEntity,
    repositories::ledger::LedgerRepository,
    value_objects::payments::{PaymentModel, TransactionModel},
};
use tracing::error;
use uuid::Uuid;

use super::payment_errors::{PaymentError, UseCaseResult};

pub struct PaymentQueryUseCase<L>
where
    L: LedgerRepository + Send + Sync + 'static,
{
    ledger_repo: Arc<L>,
}

impl<L> PaymentQueryUseCase<L>
where
    L: LedgerRepository + Send + Sync + 'static,
{
    pub fn new(ledger_repo: Arc<L>) -> Self {
        Self { ledger_repo }
    }

    /// Owner's payments, newest first, each with its transaction legs.
    pub async fn list_payments(&self, user_id: Uuid) -> UseCaseResult<Vec<PaymentModel>> {
        let payments = self
            .ledger_repo
            .list_payments_for_owner(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "payments: failed to list payments");
                PaymentError::Internal(err)
            })?;

        let payment_ids = payments.iter().map(|payment| payment.id).collect();
        let transactions = self
            .ledger_repo
            .list_transactions_for_payments(payment_ids)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "payments: failed to list payment transactions");
                PaymentError::Internal(err)
            })?;

        let mut by_payment: HashMap<Uuid, Vec<TransactionEntity>> = HashMap::new();
        for transaction in transactions {
            by_payment
                .entry(transaction.payment_id)
                .or_default()
                .push(transaction);
        }

        let models = payments
            .into_iter()
            .map(|payment| {
                let transactions = by_payment.remove(&payment.id).unwrap_or_default();
                PaymentModel::from_entities(payment, transactions)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(models)
    }

    pub async fn get_payment(&self, payment_id: Uuid, user_id: Uuid) -> UseCaseResult<PaymentModel> {
        let payment = self
            .ledger_repo
            .find_payment_for_owner(payment_id, user_id)
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payments: failed to load payment");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::NotFound)?;

        let transactions = self
            .ledger_repo
            .list_transactions_for_payments(vec![payment.id])
            .await
            .map_err(PaymentError::Internal)?;

        Ok(PaymentModel::from_entities(payment, transactions)?)
    }

    pub async fn list_transactions(&self, user_id: Uuid) -> UseCaseResult<Vec<TransactionModel>> {
        let transactions = self
            .ledger_repo
            .list_transactions_for_owner(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "transactions: failed to list transactions");
                PaymentError::Internal(err)
            })?;

        let models = transactions
            .into_iter()
            .map(TransactionModel::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(models)
    }
}
