use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::{
        payments::{InsertPaymentEntity, PaymentEntity},
        transactions::TransactionEntity,
    },
    value_objects::{
        enums::payment_statuses::PaymentStatus,
        payments::{
            InitializationRecordModel, SettlementModel, UpsertTransactionModel,
            VerificationClaim,
        },
    },
};

/// Durable storage for payments and their transaction legs.
///
/// Every write that touches an existing payment is serialized per payment id,
/// so concurrent reconciliation attempts observe each other's results. Only the
/// holder of the verification lease is expected to consult the gateway.
#[automock]
#[async_trait]
pub trait LedgerRepository {
    /// Inserts a payment. The stored status is always `pending`.
    async fn create_payment(&self, payment: InsertPaymentEntity) -> Result<PaymentEntity>;

    /// Owner-scoped lookup. A missing id and a foreign id both yield `None`.
    async fn find_payment_for_owner(
        &self,
        payment_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PaymentEntity>>;

    /// Records the gateway reference once. Fails if the payment is no longer
    /// pending, already has a reference, or the reference is taken.
    async fn set_payment_gateway_info(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        authorization_url: &str,
    ) -> Result<PaymentEntity>;

    /// Stores the gateway reference and upserts the matching `initiated` leg
    /// in one atomic step. Either both writes land or neither does.
    async fn record_initialization(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        authorization_url: &str,
    ) -> Result<InitializationRecordModel>;

    /// Forward-only status change. A terminal payment is returned unchanged.
    async fn set_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<PaymentEntity>;

    /// Inserts or updates the transaction keyed by `(payment_id, gateway_charge_id)`.
    async fn upsert_transaction(&self, upsert: UpsertTransactionModel)
    -> Result<TransactionEntity>;

    /// Moves a pending payment to `outcome` and upserts the matching transaction
    /// leg (amount taken from the payment) in one atomic step, dropping any
    /// verification lease. A payment that is already terminal is left untouched
    /// and reported with `applied = false`.
    async fn settle_payment(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        outcome: PaymentStatus,
    ) -> Result<SettlementModel>;

    /// Grants `claimant` the verification lease until `lease_until` unless the
    /// payment is terminal or another claimant holds a lease unexpired at `now`.
    /// The same claimant may renew its own lease.
    async fn claim_verification(
        &self,
        payment_id: Uuid,
        claimant: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<VerificationClaim>;

    /// Drops the lease if `claimant` still holds it. Settling also drops it.
    async fn release_verification(&self, payment_id: Uuid, claimant: Uuid) -> Result<()>;

    async fn list_payments_for_owner(&self, user_id: Uuid) -> Result<Vec<PaymentEntity>>;

    async fn list_transactions_for_owner(&self, user_id: Uuid) -> Result<Vec<TransactionEntity>>;

    async fn list_transactions_for_payments(
        &self,
        payment_ids: Vec<Uuid>,
    ) -> Result<Vec<TransactionEntity>>;

    /// Oldest first, at most `limit` rows.
    async fn list_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentEntity>>;
}
