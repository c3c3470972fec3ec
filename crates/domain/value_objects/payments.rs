use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::{payments::PaymentEntity, transactions::TransactionEntity},
    value_objects::enums::{
        payment_statuses::PaymentStatus, transaction_statuses::TransactionStatus,
    },
};

/// Authenticated caller that owns the payments it creates.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOwner {
    pub user_id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsertPaymentModel {
    pub amount: Decimal,
    pub payment_method: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertTransactionModel {
    pub payment_id: Uuid,
    pub gateway_charge_id: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
}

/// The stored gateway reference together with the `initiated` leg written
/// alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct InitializationRecordModel {
    pub payment: PaymentEntity,
    pub transaction: TransactionEntity,
}

/// Answer to a request for the verification lease on a payment.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationClaim {
    /// The caller holds the lease and is the only one to ask the gateway.
    Acquired(PaymentEntity),
    /// Another caller holds an unexpired lease.
    HeldElsewhere(PaymentEntity),
    /// The payment is terminal; nothing is left to verify.
    Settled(PaymentEntity),
}

/// Result of an atomic settle attempt. `applied` is false when the payment
/// was already terminal and nothing was written.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementModel {
    pub payment: PaymentEntity,
    pub transaction: Option<TransactionEntity>,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionModel {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub gateway_charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TransactionEntity> for TransactionModel {
    type Error = anyhow::Error;

    fn try_from(entity: TransactionEntity) -> Result<Self> {
        Ok(Self {
            status: entity.transaction_status()?,
            id: entity.id,
            payment_id: entity.payment_id,
            amount: entity.amount,
            gateway_charge_id: entity.gateway_charge_id,
            created_at: entity.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentModel {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_method: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub gateway_reference: Option<String>,
    pub authorization_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub transactions: Vec<TransactionModel>,
}

impl PaymentModel {
    pub fn from_entities(
        payment: PaymentEntity,
        transactions: Vec<TransactionEntity>,
    ) -> Result<Self> {
        let transactions = transactions
            .into_iter()
            .filter(|transaction| transaction.payment_id == payment.id)
            .map(TransactionModel::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            status: payment.payment_status()?,
            id: payment.id,
            user_id: payment.user_id,
            payment_method: payment.payment_method,
            amount: payment.amount,
            gateway_reference: payment.gateway_reference,
            authorization_url: payment.gateway_authorization_url,
            created_at: payment.created_at,
            transactions,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentInitializedDto {
    pub payment: PaymentModel,
    pub authorization_url: String,
}

/// Query string of the gateway redirect. The gateway sends the same value as
/// both `trxref` and `reference`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifyPaymentQuery {
    pub trxref: Option<String>,
    pub reference: Option<String>,
}

impl VerifyPaymentQuery {
    pub fn into_reference(self) -> Option<String> {
        self.trxref
            .into_iter()
            .chain(self.reference)
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationOutcomeDto {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    /// True when the payment was already terminal and the gateway was not asked again.
    pub already_settled: bool,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_query_prefers_trxref_and_skips_blank_values() {
        let query = VerifyPaymentQuery {
            trxref: Some("  ".to_string()),
            reference: Some("ref_123".to_string()),
        };
        assert_eq!(query.into_reference(), Some("ref_123".to_string()));

        let query = VerifyPaymentQuery {
            trxref: Some("ref_a".to_string()),
            reference: Some("ref_b".to_string()),
        };
        assert_eq!(query.into_reference(), Some("ref_a".to_string()));

        assert_eq!(VerifyPaymentQuery::default().into_reference(), None);
    }
}
