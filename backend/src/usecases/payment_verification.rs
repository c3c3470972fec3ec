use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use crates::domain::{
    entities::payments::PaymentEntity,
    repositories::ledger::LedgerRepository,
    value_objects::{
        enums::payment_statuses::PaymentStatus,
        payments::{VerificationClaim, VerificationOutcomeDto},
    },
};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    payment_errors::{PaymentError, UseCaseResult},
    payment_gateway::PaymentGateway,
};

/// How long a verifier may hold a payment, and how a concurrent caller waits
/// for the holder's result.
#[derive(Debug, Clone)]
pub struct VerificationLease {
    /// Must outlast the gateway client's request timeout.
    pub lease: TimeDelta,
    pub wait_for: Duration,
    pub poll_every: Duration,
}

impl Default for VerificationLease {
    fn default() -> Self {
        Self {
            lease: TimeDelta::seconds(45),
            wait_for: Duration::from_secs(30),
            poll_every: Duration::from_millis(250),
        }
    }
}

impl VerificationLease {
    /// Lease and wait sized for one gateway round trip bounded by `gateway_timeout`.
    pub fn covering(gateway_timeout: Duration) -> Self {
        let default = Self::default();
        let lease = TimeDelta::from_std(gateway_timeout.saturating_mul(2))
            .unwrap_or(TimeDelta::hours(1))
            .max(default.lease);
        let wait_for = gateway_timeout
            .saturating_add(Duration::from_secs(5))
            .max(default.wait_for);

        Self {
            lease,
            wait_for,
            ..default
        }
    }
}

/// Whether a caller that finds the lease taken waits for the holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnLeaseHeld {
    Wait,
    GiveUp,
}

pub struct PaymentVerificationUseCase<L, G>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    ledger_repo: Arc<L>,
    gateway: Arc<G>,
    lease: VerificationLease,
}

impl<L, G> PaymentVerificationUseCase<L, G>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(ledger_repo: Arc<L>, gateway: Arc<G>) -> Self {
        Self {
            ledger_repo,
            gateway,
            lease: VerificationLease::default(),
        }
    }

    pub fn with_lease(mut self, lease: VerificationLease) -> Self {
        self.lease = lease;
        self
    }

    /// Handles the gateway redirect for one of the caller's payments.
    ///
    /// A terminal payment is reported as-is without asking the gateway again.
    /// Otherwise the gateway is the source of truth. Only the caller holding
    /// the verification lease asks it; duplicate callbacks wait for that
    /// caller's outcome and report it as already settled.
    pub async fn verify_payment(
        &self,
        payment_id: Uuid,
        user_id: Uuid,
        reference: Option<String>,
    ) -> UseCaseResult<VerificationOutcomeDto> {
        let Some(reference) = reference.filter(|reference| !reference.trim().is_empty()) else {
            warn!(%payment_id, %user_id, "payments: verification without gateway reference");
            return Err(PaymentError::MissingReference);
        };

        let payment = self
            .ledger_repo
            .find_payment_for_owner(payment_id, user_id)
            .await
            .map_err(|err| {
                error!(%payment_id, db_error = ?err, "payments: failed to load payment");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::NotFound)?;

        let status = payment.payment_status()?;
        if status.is_terminal() {
            info!(%payment_id, %status, "payments: already settled; skipping gateway");
            return Ok(already_settled(&payment, status));
        }

        if payment.gateway_reference.as_deref() != Some(reference.as_str()) {
            warn!(
                %payment_id,
                supplied_reference = %reference,
                stored_reference = ?payment.gateway_reference,
                "payments: verification reference mismatch"
            );
            return Err(PaymentError::ReferenceMismatch);
        }

        self.reconcile(payment_id, &reference, OnLeaseHeld::Wait).await
    }

    /// Re-verifies a payment picked up by the stale sweep. No owner scoping.
    /// A payment someone else is verifying right now is left to them.
    pub async fn reconcile_stale(
        &self,
        payment: PaymentEntity,
    ) -> UseCaseResult<VerificationOutcomeDto> {
        let status = payment.payment_status()?;
        if status.is_terminal() {
            return Ok(already_settled(&payment, status));
        }

        let Some(reference) = payment.gateway_reference.as_deref() else {
            return Err(PaymentError::MissingReference);
        };

        self.reconcile(payment.id, reference, OnLeaseHeld::GiveUp).await
    }

    async fn reconcile(
        &self,
        payment_id: Uuid,
        reference: &str,
        on_held: OnLeaseHeld,
    ) -> UseCaseResult<VerificationOutcomeDto> {
        let claimant = Uuid::new_v4();
        if let Some(settled) = self.acquire_lease(payment_id, claimant, on_held).await? {
            return Ok(settled);
        }

        let (outcome, detail, gateway_failure) = match self.gateway.verify(reference).await {
            Ok(verification) if verification.succeeded => (PaymentStatus::Completed, None, None),
            Ok(verification) => {
                let detail = verification
                    .gateway_response
                    .filter(|response| !response.trim().is_empty())
                    .map(|response| format!("{} ({})", verification.raw_status, response))
                    .unwrap_or(verification.raw_status);
                (PaymentStatus::Failed, Some(detail), None)
            }
            Err(gateway_err) => {
                warn!(
                    %payment_id,
                    gateway_reference = %reference,
                    error = %gateway_err,
                    "payments: gateway verification errored; marking payment failed"
                );
                (
                    PaymentStatus::Failed,
                    Some(gateway_err.to_string()),
                    Some(gateway_err),
                )
            }
        };

        let settlement = match self
            .ledger_repo
            .settle_payment(payment_id, reference, outcome)
            .await
        {
            Ok(settlement) => settlement,
            Err(err) => {
                error!(
                    %payment_id,
                    gateway_reference = %reference,
                    db_error = ?err,
                    "payments: failed to settle payment"
                );
                self.release_lease(payment_id, claimant).await;
                return Err(PaymentError::Internal(err));
            }
        };
        let status = settlement.payment.payment_status()?;

        if !settlement.applied {
            info!(%payment_id, %status, "payments: settled concurrently; keeping stored outcome");
            return Ok(already_settled(&settlement.payment, status));
        }

        info!(
            %payment_id,
            gateway_reference = %reference,
            %status,
            "payments: payment settled"
        );

        if let Some(gateway_err) = gateway_failure {
            return Err(PaymentError::Gateway {
                payment_status: status,
                detail: gateway_err.to_string(),
            });
        }

        Ok(VerificationOutcomeDto {
            payment_id,
            status,
            already_settled: false,
            detail,
        })
    }

    /// `Ok(None)` once `claimant` holds the lease; `Ok(Some(_))` when the
    /// payment settled first, possibly while this caller was waiting.
    async fn acquire_lease(
        &self,
        payment_id: Uuid,
        claimant: Uuid,
        on_held: OnLeaseHeld,
    ) -> UseCaseResult<Option<VerificationOutcomeDto>> {
        let deadline = tokio::time::Instant::now() + self.lease.wait_for;

        loop {
            let now = Utc::now();
            let claim = self
                .ledger_repo
                .claim_verification(payment_id, claimant, now, now + self.lease.lease)
                .await
                .map_err(|err| {
                    error!(%payment_id, db_error = ?err, "payments: failed to claim verification");
                    PaymentError::Internal(err)
                })?;

            match claim {
                VerificationClaim::Acquired(_) => return Ok(None),
                VerificationClaim::Settled(payment) => {
                    let status = payment.payment_status()?;
                    info!(%payment_id, %status, "payments: settled by a concurrent verification");
                    return Ok(Some(already_settled(&payment, status)));
                }
                VerificationClaim::HeldElsewhere(payment) => {
                    if on_held == OnLeaseHeld::GiveUp || tokio::time::Instant::now() >= deadline {
                        warn!(
                            %payment_id,
                            claimed_until = ?payment.verification_claimed_until,
                            "payments: verification already in progress elsewhere"
                        );
                        return Err(PaymentError::VerificationInProgress);
                    }
                    tokio::time::sleep(self.lease.poll_every).await;
                }
            }
        }
    }

    async fn release_lease(&self, payment_id: Uuid, claimant: Uuid) {
        if let Err(err) = self
            .ledger_repo
            .release_verification(payment_id, claimant)
            .await
        {
            // The lease lapses on its own.
            warn!(%payment_id, db_error = ?err, "payments: failed to release verification lease");
        }
    }
}

fn already_settled(payment: &PaymentEntity, status: PaymentStatus) -> VerificationOutcomeDto {
    VerificationOutcomeDto {
        payment_id: payment.id,
        status,
        already_settled: true,
        detail: None,
    }
}
