use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    entities::{
        payments::{InsertPaymentEntity, PaymentEntity},
        transactions::TransactionEntity,
    },
    repositories::ledger::LedgerRepository,
    value_objects::{
        enums::{payment_statuses::PaymentStatus, transaction_statuses::TransactionStatus},
        payments::{
            InitializationRecordModel, SettlementModel, UpsertTransactionModel,
            VerificationClaim,
        },
    },
};

#[derive(Default)]
struct LedgerTables {
    payments: HashMap<Uuid, PaymentEntity>,
    transactions: Vec<TransactionEntity>,
}

impl LedgerTables {
    fn transaction_mut(
        &mut self,
        payment_id: Uuid,
        gateway_charge_id: &str,
    ) -> Option<&mut TransactionEntity> {
        self.transactions.iter_mut().find(|transaction| {
            transaction.payment_id == payment_id
                && transaction.gateway_charge_id.as_deref() == Some(gateway_charge_id)
        })
    }

    fn store_gateway_info(
        &mut self,
        payment_id: Uuid,
        gateway_reference: &str,
        authorization_url: &str,
    ) -> Result<PaymentEntity> {
        let reference_taken = self
            .payments
            .values()
            .any(|payment| payment.gateway_reference.as_deref() == Some(gateway_reference));
        if reference_taken {
            bail!("gateway reference {gateway_reference} is already in use");
        }

        let payment = self.payment_mut(payment_id)?;
        if payment.payment_status()? != PaymentStatus::Pending || payment.gateway_reference.is_some()
        {
            bail!("payment {payment_id} is not awaiting a gateway reference");
        }

        payment.gateway_reference = Some(gateway_reference.to_string());
        payment.gateway_authorization_url = Some(authorization_url.to_string());
        payment.updated_at = Utc::now();

        Ok(payment.clone())
    }

    fn payment_mut(&mut self, payment_id: Uuid) -> Result<&mut PaymentEntity> {
        self.payments
            .get_mut(&payment_id)
            .ok_or_else(|| anyhow!("payment {payment_id} does not exist"))
    }

    fn upsert_transaction(
        &mut self,
        payment_id: Uuid,
        gateway_charge_id: &str,
        amount: rust_decimal::Decimal,
        status: TransactionStatus,
    ) -> Result<TransactionEntity> {
        if !self.payments.contains_key(&payment_id) {
            bail!("payment {payment_id} does not exist");
        }

        let now = Utc::now();
        if let Some(existing) = self.transaction_mut(payment_id, gateway_charge_id) {
            existing.amount = amount;
            existing.status = status.to_string();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let transaction = TransactionEntity {
            id: Uuid::new_v4(),
            payment_id,
            amount,
            status: status.to_string(),
            gateway_charge_id: Some(gateway_charge_id.to_string()),
            created_at: now,
            updated_at: now,
        };
        self.transactions.push(transaction.clone());
        Ok(transaction)
    }
}

/// Ledger kept in process memory. One mutex guards both tables, which gives
/// the same per-payment atomicity as the row locks of the Postgres store.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    tables: Arc<Mutex<LedgerTables>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transaction row, in insertion order.
    pub async fn all_transactions(&self) -> Vec<TransactionEntity> {
        self.tables.lock().await.transactions.clone()
    }

    pub async fn payment_count(&self) -> usize {
        self.tables.lock().await.payments.len()
    }

    pub async fn find_payment(&self, payment_id: Uuid) -> Option<PaymentEntity> {
        self.tables.lock().await.payments.get(&payment_id).cloned()
    }

    /// Backdates a payment, used to simulate rows left behind by earlier runs.
    pub async fn set_created_at(&self, payment_id: Uuid, created_at: DateTime<Utc>) {
        if let Some(payment) = self.tables.lock().await.payments.get_mut(&payment_id) {
            payment.created_at = created_at;
        }
    }
}

fn newest_first<T>(rows: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    async fn create_payment(&self, payment: InsertPaymentEntity) -> Result<PaymentEntity> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let created = PaymentEntity {
            id: Uuid::new_v4(),
            user_id: payment.user_id,
            payment_method: payment.payment_method,
            amount: payment.amount,
            status: PaymentStatus::Pending.to_string(),
            gateway_reference: None,
            gateway_authorization_url: None,
            verification_claimed_by: None,
            verification_claimed_until: None,
            created_at: now,
            updated_at: now,
        };
        tables.payments.insert(created.id, created.clone());

        Ok(created)
    }

    async fn find_payment_for_owner(
        &self,
        payment_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PaymentEntity>> {
        let tables = self.tables.lock().await;

        Ok(tables
            .payments
            .get(&payment_id)
            .filter(|payment| payment.user_id == user_id)
            .cloned())
    }

    async fn set_payment_gateway_info(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        authorization_url: &str,
    ) -> Result<PaymentEntity> {
        let mut tables = self.tables.lock().await;

        tables.store_gateway_info(payment_id, gateway_reference, authorization_url)
    }

    async fn record_initialization(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        authorization_url: &str,
    ) -> Result<InitializationRecordModel> {
        let mut tables = self.tables.lock().await;

        let payment = tables.store_gateway_info(payment_id, gateway_reference, authorization_url)?;
        let transaction = tables.upsert_transaction(
            payment_id,
            gateway_reference,
            payment.amount,
            TransactionStatus::Initiated,
        )?;

        Ok(InitializationRecordModel {
            payment,
            transaction,
        })
    }

    async fn set_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<PaymentEntity> {
        let mut tables = self.tables.lock().await;

        let payment = tables.payment_mut(payment_id)?;
        let current_status = payment.payment_status()?;

        if current_status == status || current_status.is_terminal() {
            return Ok(payment.clone());
        }
        if !current_status.can_transition_to(status) {
            bail!("payment {payment_id} cannot move from {current_status} to {status}");
        }

        payment.status = status.to_string();
        payment.verification_claimed_by = None;
        payment.verification_claimed_until = None;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn upsert_transaction(
        &self,
        upsert: UpsertTransactionModel,
    ) -> Result<TransactionEntity> {
        let mut tables = self.tables.lock().await;

        tables.upsert_transaction(
            upsert.payment_id,
            &upsert.gateway_charge_id,
            upsert.amount,
            upsert.status,
        )
    }

    async fn settle_payment(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        outcome: PaymentStatus,
    ) -> Result<SettlementModel> {
        let transaction_status = TransactionStatus::settled_from(outcome)
            .ok_or_else(|| anyhow!("cannot settle payment {payment_id} as {outcome}"))?;
        let mut tables = self.tables.lock().await;

        let payment = tables.payment_mut(payment_id)?;

        if payment.payment_status()?.is_terminal() {
            let payment = payment.clone();
            let transaction = tables
                .transaction_mut(payment_id, gateway_reference)
                .map(|transaction| transaction.clone());
            return Ok(SettlementModel {
                payment,
                transaction,
                applied: false,
            });
        }

        payment.status = outcome.to_string();
        payment.verification_claimed_by = None;
        payment.verification_claimed_until = None;
        payment.updated_at = Utc::now();
        let payment = payment.clone();

        let transaction = tables.upsert_transaction(
            payment_id,
            gateway_reference,
            payment.amount,
            transaction_status,
        )?;

        Ok(SettlementModel {
            payment,
            transaction: Some(transaction),
            applied: true,
        })
    }

    async fn claim_verification(
        &self,
        payment_id: Uuid,
        claimant: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<VerificationClaim> {
        let mut tables = self.tables.lock().await;
        let payment = tables.payment_mut(payment_id)?;

        if payment.payment_status()?.is_terminal() {
            return Ok(VerificationClaim::Settled(payment.clone()));
        }
        if payment.verification_claimed_elsewhere(claimant, now) {
            return Ok(VerificationClaim::HeldElsewhere(payment.clone()));
        }

        payment.verification_claimed_by = Some(claimant);
        payment.verification_claimed_until = Some(lease_until);
        Ok(VerificationClaim::Acquired(payment.clone()))
    }

    async fn release_verification(&self, payment_id: Uuid, claimant: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let payment = tables.payment_mut(payment_id)?;

        if payment.verification_claimed_by == Some(claimant) {
            payment.verification_claimed_by = None;
            payment.verification_claimed_until = None;
        }
        Ok(())
    }

    async fn list_payments_for_owner(&self, user_id: Uuid) -> Result<Vec<PaymentEntity>> {
        let tables = self.tables.lock().await;

        let mut payments: Vec<PaymentEntity> = tables
            .payments
            .values()
            .filter(|payment| payment.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut payments, |payment| payment.created_at);

        Ok(payments)
    }

    async fn list_transactions_for_owner(&self, user_id: Uuid) -> Result<Vec<TransactionEntity>> {
        let tables = self.tables.lock().await;

        let mut transactions: Vec<TransactionEntity> = tables
            .transactions
            .iter()
            .filter(|transaction| {
                tables
                    .payments
                    .get(&transaction.payment_id)
                    .is_some_and(|payment| payment.user_id == user_id)
            })
            .cloned()
            .collect();
        newest_first(&mut transactions, |transaction| transaction.created_at);

        Ok(transactions)
    }

    async fn list_transactions_for_payments(
        &self,
        payment_ids: Vec<Uuid>,
    ) -> Result<Vec<TransactionEntity>> {
        let tables = self.tables.lock().await;

        let mut transactions: Vec<TransactionEntity> = tables
            .transactions
            .iter()
            .filter(|transaction| payment_ids.contains(&transaction.payment_id))
            .cloned()
            .collect();
        newest_first(&mut transactions, |transaction| transaction.created_at);

        Ok(transactions)
    }

    async fn list_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentEntity>> {
        let tables = self.tables.lock().await;

        let mut payments: Vec<PaymentEntity> = tables
            .payments
            .values()
            .filter(|payment| payment.status == PaymentStatus::Pending.as_str())
            .filter(|payment| payment.created_at < created_before)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.created_at);
        payments.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn new_payment(user_id: Uuid) -> InsertPaymentEntity {
        InsertPaymentEntity {
            user_id,
            payment_method: "Bank Transfer".to_string(),
            amount: dec!(2500.00),
            status: "completed".to_string(),
        }
    }

    #[tokio::test]
    async fn create_payment_forces_pending_status() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();

        assert_eq!(payment.status, "pending");
        assert!(payment.gateway_reference.is_none());
    }

    #[tokio::test]
    async fn owner_scoped_lookup_hides_foreign_payments() {
        let ledger = InMemoryLedger::new();
        let owner = Uuid::new_v4();
        let payment = ledger.create_payment(new_payment(owner)).await.unwrap();

        assert!(ledger.find_payment_for_owner(payment.id, owner).await.unwrap().is_some());
        assert!(
            ledger
                .find_payment_for_owner(payment.id, Uuid::new_v4())
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            ledger
                .find_payment_for_owner(Uuid::new_v4(), owner)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn gateway_reference_is_set_once_and_never_reused() {
        let ledger = InMemoryLedger::new();
        let first = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();
        let second = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();

        ledger
            .set_payment_gateway_info(first.id, "ref_1", "https://checkout/ref_1")
            .await
            .unwrap();

        assert!(
            ledger
                .set_payment_gateway_info(first.id, "ref_2", "https://checkout/ref_2")
                .await
                .is_err()
        );
        assert!(
            ledger
                .set_payment_gateway_info(second.id, "ref_1", "https://checkout/ref_1")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn status_never_leaves_a_terminal_state() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();

        let failed = ledger
            .set_payment_status(payment.id, PaymentStatus::Failed)
            .await
            .unwrap();
        assert_eq!(failed.status, "failed");

        let unchanged = ledger
            .set_payment_status(payment.id, PaymentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(unchanged.status, "failed");
    }

    #[tokio::test]
    async fn upsert_updates_the_existing_leg_instead_of_duplicating() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();

        for status in [TransactionStatus::Initiated, TransactionStatus::Completed] {
            ledger
                .upsert_transaction(UpsertTransactionModel {
                    payment_id: payment.id,
                    gateway_charge_id: "ref_1".to_string(),
                    amount: payment.amount,
                    status,
                })
                .await
                .unwrap();
        }

        let transactions = ledger.all_transactions().await;
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].status, "completed");
    }

    #[tokio::test]
    async fn settle_applies_once_and_reports_later_attempts_as_noops() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();

        let first = ledger
            .settle_payment(payment.id, "ref_1", PaymentStatus::Completed)
            .await
            .unwrap();
        assert!(first.applied);
        assert_eq!(first.payment.status, "completed");
        assert_eq!(first.transaction.as_ref().unwrap().amount, dec!(2500.00));

        let second = ledger
            .settle_payment(payment.id, "ref_1", PaymentStatus::Failed)
            .await
            .unwrap();
        assert!(!second.applied);
        assert_eq!(second.payment.status, "completed");
        assert_eq!(second.transaction.unwrap().status, "completed");
        assert_eq!(ledger.all_transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn settle_rejects_pending_as_an_outcome() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();

        assert!(
            ledger
                .settle_payment(payment.id, "ref_1", PaymentStatus::Pending)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn stale_pending_listing_is_oldest_first_and_bounded() {
        let ledger = InMemoryLedger::new();
        let now = Utc::now();
        let mut ids = Vec::new();
        for hours in [30, 50, 40] {
            let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();
            ledger
                .set_created_at(payment.id, now - Duration::hours(hours))
                .await;
            ids.push(payment.id);
        }
        let fresh = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();

        let stale = ledger
            .list_stale_pending_payments(now - Duration::hours(24), 2)
            .await
            .unwrap();

        let stale_ids: Vec<Uuid> = stale.iter().map(|payment| payment.id).collect();
        assert_eq!(stale_ids, vec![ids[1], ids[2]]);
        assert!(!stale_ids.contains(&fresh.id));
    }

    #[tokio::test]
    async fn record_initialization_writes_reference_and_initiated_leg_together() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();

        let record = ledger
            .record_initialization(payment.id, "ref_1", "https://checkout/ref_1")
            .await
            .unwrap();

        assert_eq!(record.payment.gateway_reference.as_deref(), Some("ref_1"));
        assert_eq!(record.transaction.status, "initiated");
        assert_eq!(record.transaction.amount, dec!(2500.00));
        assert_eq!(ledger.all_transactions().await, vec![record.transaction]);
    }

    #[tokio::test]
    async fn rejected_initialization_record_leaves_no_leg_behind() {
        let ledger = InMemoryLedger::new();
        let first = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();
        let second = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();
        ledger
            .record_initialization(first.id, "ref_1", "https://checkout/ref_1")
            .await
            .unwrap();

        assert!(
            ledger
                .record_initialization(second.id, "ref_1", "https://checkout/ref_1")
                .await
                .is_err()
        );

        let stored = ledger.find_payment(second.id).await.unwrap();
        assert!(stored.gateway_reference.is_none());
        assert!(
            ledger
                .list_transactions_for_payments(vec![second.id])
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn verification_lease_is_exclusive_until_it_expires() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();
        let (holder, other) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let lease_until = now + Duration::seconds(30);

        let claim = ledger
            .claim_verification(payment.id, holder, now, lease_until)
            .await
            .unwrap();
        assert!(matches!(claim, VerificationClaim::Acquired(_)));

        let claim = ledger
            .claim_verification(payment.id, other, now, now + Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(claim, VerificationClaim::HeldElsewhere(_)));

        // The holder may renew.
        let claim = ledger
            .claim_verification(payment.id, holder, now, lease_until)
            .await
            .unwrap();
        assert!(matches!(claim, VerificationClaim::Acquired(_)));

        // A lapsed lease can be taken over.
        let later = lease_until + Duration::seconds(1);
        let claim = ledger
            .claim_verification(payment.id, other, later, later + Duration::seconds(30))
            .await
            .unwrap();
        match claim {
            VerificationClaim::Acquired(payment) => {
                assert_eq!(payment.verification_claimed_by, Some(other));
            }
            unexpected => panic!("expected the lapsed lease to be taken over, got {unexpected:?}"),
        }
    }

    #[tokio::test]
    async fn settling_drops_the_lease_and_later_claims_see_the_outcome() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();
        let holder = Uuid::new_v4();
        let now = Utc::now();
        ledger
            .claim_verification(payment.id, holder, now, now + Duration::seconds(30))
            .await
            .unwrap();

        let settlement = ledger
            .settle_payment(payment.id, "ref_1", PaymentStatus::Completed)
            .await
            .unwrap();
        assert!(settlement.payment.verification_claimed_by.is_none());

        let claim = ledger
            .claim_verification(payment.id, Uuid::new_v4(), now, now + Duration::seconds(30))
            .await
            .unwrap();
        match claim {
            VerificationClaim::Settled(payment) => assert_eq!(payment.status, "completed"),
            unexpected => panic!("expected a settled payment, got {unexpected:?}"),
        }
    }

    #[tokio::test]
    async fn release_only_drops_the_callers_own_lease() {
        let ledger = InMemoryLedger::new();
        let payment = ledger.create_payment(new_payment(Uuid::new_v4())).await.unwrap();
        let holder = Uuid::new_v4();
        let now = Utc::now();
        ledger
            .claim_verification(payment.id, holder, now, now + Duration::seconds(30))
            .await
            .unwrap();

        ledger.release_verification(payment.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(
            ledger.find_payment(payment.id).await.unwrap().verification_claimed_by,
            Some(holder)
        );

        ledger.release_verification(payment.id, holder).await.unwrap();
        let claim = ledger
            .claim_verification(payment.id, Uuid::new_v4(), now, now + Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(claim, VerificationClaim::Acquired(_)));
    }
}
