use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{PgConnection, insert_into, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{payments, transactions},
    },
};
use domain::{
    entities::{
        payments::{InsertPaymentEntity, PaymentEntity},
        transactions::{InsertTransactionEntity, TransactionEntity},
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

pub struct LedgerPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl LedgerPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

/// Takes the row lock that serializes every writer of this payment until the
/// surrounding transaction ends.
fn lock_payment(conn: &mut PgConnection, payment_id: Uuid) -> Result<PaymentEntity> {
    let payment = payments::table
        .find(payment_id)
        .select(PaymentEntity::as_select())
        .for_update()
        .first::<PaymentEntity>(conn)
        .optional()?
        .ok_or_else(|| anyhow!("payment {payment_id} does not exist"))?;

    Ok(payment)
}

fn find_transaction(
    conn: &mut PgConnection,
    payment_id: Uuid,
    gateway_charge_id: &str,
) -> Result<Option<TransactionEntity>> {
    let transaction = transactions::table
        .filter(transactions::payment_id.eq(payment_id))
        .filter(transactions::gateway_charge_id.eq(gateway_charge_id))
        .select(TransactionEntity::as_select())
        .first::<TransactionEntity>(conn)
        .optional()?;

    Ok(transaction)
}

fn upsert_transaction_row(
    conn: &mut PgConnection,
    row: &InsertTransactionEntity,
) -> Result<TransactionEntity> {
    let transaction = insert_into(transactions::table)
        .values(row)
        .on_conflict((transactions::payment_id, transactions::gateway_charge_id))
        .do_update()
        .set((
            transactions::status.eq(&row.status),
            transactions::amount.eq(row.amount),
            transactions::updated_at.eq(Utc::now()),
        ))
        .returning(TransactionEntity::as_select())
        .get_result::<TransactionEntity>(conn)?;

    Ok(transaction)
}

/// Filtered update: only a pending payment without a reference matches.
fn store_gateway_info(
    conn: &mut PgConnection,
    payment_id: Uuid,
    gateway_reference: &str,
    authorization_url: &str,
) -> Result<PaymentEntity> {
    let updated = diesel::update(
        payments::table
            .filter(payments::id.eq(payment_id))
            .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
            .filter(payments::gateway_reference.is_null()),
    )
    .set((
        payments::gateway_reference.eq(Some(gateway_reference)),
        payments::gateway_authorization_url.eq(Some(authorization_url)),
        payments::updated_at.eq(Utc::now()),
    ))
    .returning(PaymentEntity::as_select())
    .get_result::<PaymentEntity>(conn)
    .optional()
    .with_context(|| format!("failed to store gateway reference for payment {payment_id}"))?;

    updated.ok_or_else(|| anyhow!("payment {payment_id} is not awaiting a gateway reference"))
}

fn update_payment_status(
    conn: &mut PgConnection,
    payment_id: Uuid,
    status: PaymentStatus,
) -> Result<PaymentEntity> {
    let payment = diesel::update(payments::table.find(payment_id))
        .set((
            payments::status.eq(status.as_str()),
            payments::verification_claimed_by.eq(None::<Uuid>),
            payments::verification_claimed_until.eq(None::<DateTime<Utc>>),
            payments::updated_at.eq(Utc::now()),
        ))
        .returning(PaymentEntity::as_select())
        .get_result::<PaymentEntity>(conn)?;

    Ok(payment)
}

#[async_trait]
impl LedgerRepository for LedgerPostgres {
    async fn create_payment(&self, payment: InsertPaymentEntity) -> Result<PaymentEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = InsertPaymentEntity {
            status: PaymentStatus::Pending.to_string(),
            ..payment
        };

        let created = insert_into(payments::table)
            .values(&payment)
            .returning(PaymentEntity::as_select())
            .get_result::<PaymentEntity>(&mut conn)?;

        Ok(created)
    }

    async fn find_payment_for_owner(
        &self,
        payment_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = payments::table
            .filter(payments::id.eq(payment_id))
            .filter(payments::user_id.eq(user_id))
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(&mut conn)
            .optional()?;

        Ok(payment)
    }

    async fn set_payment_gateway_info(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        authorization_url: &str,
    ) -> Result<PaymentEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        store_gateway_info(&mut conn, payment_id, gateway_reference, authorization_url)
    }

    async fn record_initialization(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        authorization_url: &str,
    ) -> Result<InitializationRecordModel> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let record = conn.transaction::<InitializationRecordModel, anyhow::Error, _>(|conn| {
            let payment =
                store_gateway_info(conn, payment_id, gateway_reference, authorization_url)?;
            let transaction = upsert_transaction_row(
                conn,
                &InsertTransactionEntity {
                    payment_id,
                    amount: payment.amount,
                    status: TransactionStatus::Initiated.to_string(),
                    gateway_charge_id: Some(gateway_reference.to_string()),
                },
            )?;

            Ok(InitializationRecordModel {
                payment,
                transaction,
            })
        })?;

        Ok(record)
    }

    async fn set_payment_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<PaymentEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = conn.transaction::<PaymentEntity, anyhow::Error, _>(|conn| {
            let current = lock_payment(conn, payment_id)?;
            let current_status = current.payment_status()?;

            if current_status == status || current_status.is_terminal() {
                return Ok(current);
            }
            if !current_status.can_transition_to(status) {
                bail!("payment {payment_id} cannot move from {current_status} to {status}");
            }

            update_payment_status(conn, payment_id, status)
        })?;

        Ok(payment)
    }

    async fn upsert_transaction(
        &self,
        upsert: UpsertTransactionModel,
    ) -> Result<TransactionEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let row = InsertTransactionEntity {
            payment_id: upsert.payment_id,
            amount: upsert.amount,
            status: upsert.status.to_string(),
            gateway_charge_id: Some(upsert.gateway_charge_id),
        };

        upsert_transaction_row(&mut conn, &row)
    }

    async fn settle_payment(
        &self,
        payment_id: Uuid,
        gateway_reference: &str,
        outcome: PaymentStatus,
    ) -> Result<SettlementModel> {
        let transaction_status = TransactionStatus::settled_from(outcome)
            .ok_or_else(|| anyhow!("cannot settle payment {payment_id} as {outcome}"))?;
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let settlement = conn.transaction::<SettlementModel, anyhow::Error, _>(|conn| {
            let payment = lock_payment(conn, payment_id)?;

            if payment.payment_status()?.is_terminal() {
                let transaction = find_transaction(conn, payment_id, gateway_reference)?;
                return Ok(SettlementModel {
                    payment,
                    transaction,
                    applied: false,
                });
            }

            let payment = update_payment_status(conn, payment_id, outcome)?;
            let transaction = upsert_transaction_row(
                conn,
                &InsertTransactionEntity {
                    payment_id,
                    amount: payment.amount,
                    status: transaction_status.to_string(),
                    gateway_charge_id: Some(gateway_reference.to_string()),
                },
            )?;

            Ok(SettlementModel {
                payment,
                transaction: Some(transaction),
                applied: true,
            })
        })?;

        Ok(settlement)
    }

    async fn claim_verification(
        &self,
        payment_id: Uuid,
        claimant: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<VerificationClaim> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let claim = conn.transaction::<VerificationClaim, anyhow::Error, _>(|conn| {
            let payment = lock_payment(conn, payment_id)?;

            if payment.payment_status()?.is_terminal() {
                return Ok(VerificationClaim::Settled(payment));
            }
            if payment.verification_claimed_elsewhere(claimant, now) {
                return Ok(VerificationClaim::HeldElsewhere(payment));
            }

            let payment = diesel::update(payments::table.find(payment_id))
                .set((
                    payments::verification_claimed_by.eq(Some(claimant)),
                    payments::verification_claimed_until.eq(Some(lease_until)),
                ))
                .returning(PaymentEntity::as_select())
                .get_result::<PaymentEntity>(conn)?;

            Ok(VerificationClaim::Acquired(payment))
        })?;

        Ok(claim)
    }

    async fn release_verification(&self, payment_id: Uuid, claimant: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        diesel::update(
            payments::table
                .filter(payments::id.eq(payment_id))
                .filter(payments::verification_claimed_by.eq(claimant)),
        )
        .set((
            payments::verification_claimed_by.eq(None::<Uuid>),
            payments::verification_claimed_until.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)?;

        Ok(())
    }

    async fn list_payments_for_owner(&self, user_id: Uuid) -> Result<Vec<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payments = payments::table
            .filter(payments::user_id.eq(user_id))
            .order(payments::created_at.desc())
            .select(PaymentEntity::as_select())
            .load::<PaymentEntity>(&mut conn)?;

        Ok(payments)
    }

    async fn list_transactions_for_owner(&self, user_id: Uuid) -> Result<Vec<TransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let transactions = transactions::table
            .inner_join(payments::table)
            .filter(payments::user_id.eq(user_id))
            .order(transactions::created_at.desc())
            .select(TransactionEntity::as_select())
            .load::<TransactionEntity>(&mut conn)?;

        Ok(transactions)
    }

    async fn list_transactions_for_payments(
        &self,
        payment_ids: Vec<Uuid>,
    ) -> Result<Vec<TransactionEntity>> {
        if payment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let transactions = transactions::table
            .filter(transactions::payment_id.eq_any(payment_ids))
            .order(transactions::created_at.desc())
            .select(TransactionEntity::as_select())
            .load::<TransactionEntity>(&mut conn)?;

        Ok(transactions)
    }

    async fn list_stale_pending_payments(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payments = payments::table
            .filter(payments::status.eq(PaymentStatus::Pending.as_str()))
            .filter(payments::created_at.lt(created_before))
            .order(payments::created_at.asc())
            .limit(limit)
            .select(PaymentEntity::as_select())
            .load::<PaymentEntity>(&mut conn)?;

        Ok(payments)
    }
}

/// Runs against a scratch database:
/// `TEST_DATABASE_URL=postgres://... cargo test -p crates -- --ignored`.
/// Tables are created from the migration when missing; rows are never deleted.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::db::postgres::postgres_connection::establish_connection;
    use chrono::Duration;
    use diesel::{connection::SimpleConnection, dsl::sql, prelude::*, sql_types::Bool};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    const SCHEMA: &str =
        include_str!("../../../../migrations/2025-01-01-000000_create_payments/up.sql");

    static SCHEMA_READY: Mutex<bool> = Mutex::new(false);

    fn ledger() -> Arc<LedgerPostgres> {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must point at a scratch Postgres database");
        let pool = establish_connection(&database_url, 4).unwrap();

        let mut ready = SCHEMA_READY.lock().unwrap();
        if !*ready {
            let mut conn = pool.get().unwrap();
            let exists = diesel::select(sql::<Bool>("to_regclass('public.payments') IS NOT NULL"))
                .get_result::<bool>(&mut conn)
                .unwrap();
            if !exists {
                conn.batch_execute(SCHEMA).unwrap();
            }
            *ready = true;
        }

        Arc::new(LedgerPostgres::new(Arc::new(pool)))
    }

    async fn pending_payment(ledger: &LedgerPostgres) -> PaymentEntity {
        ledger
            .create_payment(InsertPaymentEntity {
                user_id: Uuid::new_v4(),
                payment_method: "Bank Transfer".to_string(),
                amount: dec!(1800.50),
                status: PaymentStatus::Completed.to_string(),
            })
            .await
            .unwrap()
    }

    fn unique_reference() -> String {
        format!("ref_{}", Uuid::new_v4().simple())
    }

    #[tokio::test]
    #[ignore]
    async fn record_initialization_is_all_or_nothing() {
        let ledger = ledger();
        let first = pending_payment(&ledger).await;
        let second = pending_payment(&ledger).await;
        assert_eq!(first.status, "pending");
        let reference = unique_reference();

        let record = ledger
            .record_initialization(first.id, &reference, "https://checkout.paystack.com/a")
            .await
            .unwrap();
        assert_eq!(record.payment.gateway_reference.as_deref(), Some(reference.as_str()));
        assert_eq!(record.transaction.status, "initiated");
        assert_eq!(record.transaction.amount, dec!(1800.50));

        // The unique index rejects the reuse; nothing of the second record may remain.
        assert!(
            ledger
                .record_initialization(second.id, &reference, "https://checkout.paystack.com/b")
                .await
                .is_err()
        );
        let untouched = ledger
            .find_payment_for_owner(second.id, second.user_id)
            .await
            .unwrap()
            .unwrap();
        assert!(untouched.gateway_reference.is_none());
        assert!(
            ledger
                .list_transactions_for_payments(vec![second.id])
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    #[ignore]
    async fn upsert_updates_the_leg_in_place() {
        let ledger = ledger();
        let payment = pending_payment(&ledger).await;
        let reference = unique_reference();

        for status in [TransactionStatus::Initiated, TransactionStatus::Failed] {
            ledger
                .upsert_transaction(UpsertTransactionModel {
                    payment_id: payment.id,
                    gateway_charge_id: reference.clone(),
                    amount: payment.amount,
                    status,
                })
                .await
                .unwrap();
        }

        let transactions = ledger
            .list_transactions_for_payments(vec![payment.id])
            .await
            .unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].status, "failed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn concurrent_settles_apply_exactly_once() {
        let ledger = ledger();
        let payment = pending_payment(&ledger).await;
        let reference = unique_reference();
        ledger
            .record_initialization(payment.id, &reference, "https://checkout.paystack.com/c")
            .await
            .unwrap();

        let payment_id = payment.id;
        let handles: Vec<_> = [PaymentStatus::Completed, PaymentStatus::Failed]
            .into_iter()
            .cycle()
            .take(6)
            .map(|outcome| {
                let ledger = Arc::clone(&ledger);
                let reference = reference.clone();
                tokio::spawn(async move {
                    ledger.settle_payment(payment_id, &reference, outcome).await
                })
            })
            .collect();
        let mut settlements = Vec::new();
        for handle in handles {
            settlements.push(handle.await.unwrap().unwrap());
        }

        let applied: Vec<_> = settlements.iter().filter(|settlement| settlement.applied).collect();
        assert_eq!(applied.len(), 1);
        let winner = applied[0].payment.status.clone();
        assert!(settlements.iter().all(|settlement| settlement.payment.status == winner));

        let transactions = ledger
            .list_transactions_for_payments(vec![payment.id])
            .await
            .unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].status, winner);
    }

    #[tokio::test]
    #[ignore]
    async fn verification_lease_is_exclusive_and_cleared_by_settle() {
        let ledger = ledger();
        let payment = pending_payment(&ledger).await;
        let reference = unique_reference();
        ledger
            .record_initialization(payment.id, &reference, "https://checkout.paystack.com/d")
            .await
            .unwrap();
        let (holder, other) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let claim = ledger
            .claim_verification(payment.id, holder, now, now + Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(claim, VerificationClaim::Acquired(_)));
        let claim = ledger
            .claim_verification(payment.id, other, now, now + Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(claim, VerificationClaim::HeldElsewhere(_)));

        ledger.release_verification(payment.id, other).await.unwrap();
        let claim = ledger
            .claim_verification(payment.id, other, now, now + Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(claim, VerificationClaim::HeldElsewhere(_)));

        let settlement = ledger
            .settle_payment(payment.id, &reference, PaymentStatus::Completed)
            .await
            .unwrap();
        assert!(settlement.applied);
        assert!(settlement.payment.verification_claimed_by.is_none());

        let claim = ledger
            .claim_verification(payment.id, other, now, now + Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(claim, VerificationClaim::Settled(_)));
    }

    #[tokio::test]
    #[ignore]
    async fn lapsed_lease_can_be_taken_over() {
        let ledger = ledger();
        let payment = pending_payment(&ledger).await;
        let now = Utc::now();
        ledger
            .claim_verification(payment.id, Uuid::new_v4(), now, now + Duration::seconds(5))
            .await
            .unwrap();

        let later = now + Duration::seconds(10);
        let successor = Uuid::new_v4();
        let claim = ledger
            .claim_verification(payment.id, successor, later, later + Duration::seconds(30))
            .await
            .unwrap();

        match claim {
            VerificationClaim::Acquired(payment) => {
                assert_eq!(payment.verification_claimed_by, Some(successor));
            }
            unexpected => panic!("expected the lapsed lease to be taken over, got {unexpected:?}"),
        }
    }
}
