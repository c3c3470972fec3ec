use anyhow::Result;
use backend::usecases::{
    payment_errors::PaymentError, payment_gateway::PaymentGateway,
    payment_verification::{PaymentVerificationUseCase, VerificationLease},
};
use chrono::{DateTime, Duration, Utc};
use crates::domain::{
    repositories::ledger::LedgerRepository,
    value_objects::enums::payment_statuses::PaymentStatus,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::config_model::Sweep;

/// Tally of one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub already_settled: usize,
    pub skipped_without_reference: usize,
    /// Being verified by another caller; picked up on a later pass if still pending.
    pub in_flight: usize,
    pub errors: usize,
}

/// Re-verifies payments that stayed `pending` because the redirect never
/// arrived or the process died mid-flow.
pub struct StalePendingSweepUseCase<L, G>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    ledger_repo: Arc<L>,
    verification: PaymentVerificationUseCase<L, G>,
    settings: Sweep,
}

impl<L, G> StalePendingSweepUseCase<L, G>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(ledger_repo: Arc<L>, gateway: Arc<G>, settings: Sweep) -> Self {
        Self {
            verification: PaymentVerificationUseCase::new(Arc::clone(&ledger_repo), gateway),
            ledger_repo,
            settings,
        }
    }

    pub fn with_lease(mut self, lease: VerificationLease) -> Self {
        self.verification = self.verification.with_lease(lease);
        self
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.settings.interval_secs)
    }

    /// One pass over the oldest stale payments. Only the listing itself can
    /// fail the pass; per-payment problems are counted and logged.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let created_before = now - Duration::minutes(self.settings.stale_after_minutes);
        let stale = self
            .ledger_repo
            .list_stale_pending_payments(created_before, self.settings.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        if stale.is_empty() {
            return Ok(report);
        }
        info!(count = stale.len(), %created_before, "sweep: re-verifying stale pending payments");

        for payment in stale {
            let payment_id = payment.id;

            if payment.gateway_reference.is_none() {
                warn!(
                    %payment_id,
                    created_at = %payment.created_at,
                    "sweep: pending payment has no gateway reference; needs operator attention"
                );
                report.skipped_without_reference += 1;
                continue;
            }

            match self.verification.reconcile_stale(payment).await {
                Ok(outcome) if outcome.already_settled => report.already_settled += 1,
                Ok(outcome) => match outcome.status {
                    PaymentStatus::Completed => report.completed += 1,
                    _ => report.failed += 1,
                },
                Err(PaymentError::VerificationInProgress) => report.in_flight += 1,
                Err(PaymentError::Gateway { detail, .. }) => {
                    warn!(%payment_id, %detail, "sweep: gateway unavailable; payment marked failed");
                    report.failed += 1;
                }
                Err(err) => {
                    error!(%payment_id, error = %err, "sweep: failed to reconcile payment");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            completed = report.completed,
            failed = report.failed,
            already_settled = report.already_settled,
            skipped = report.skipped_without_reference,
            in_flight = report.in_flight,
            errors = report.errors,
            "sweep: pass finished"
        );

        Ok(report)
    }
}
