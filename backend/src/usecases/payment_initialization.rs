use std::{collections::HashMap, sync::Arc};

use crates::domain::{
    entities::payments::InsertPaymentEntity,
    repositories::ledger::LedgerRepository,
    value_objects::{
        amounts::validate_amount,
        enums::payment_statuses::PaymentStatus,
        payments::{InsertPaymentModel, PaymentInitializedDto, PaymentModel, PaymentOwner},
    },
};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    payment_errors::{PaymentError, UseCaseResult},
    payment_gateway::{GatewayInitializeRequest, PaymentGateway},
};

/// Sent to the gateway when the owner has no email on record.
pub const PLACEHOLDER_EMAIL: &str = "customer@example.com";

const MAX_PAYMENT_METHOD_LEN: usize = 255;

/// Gateway redirect target for a payment.
pub fn callback_url(callback_base_url: &str, payment_id: Uuid) -> String {
    format!(
        "{}/api/v1/payments/{}/verify",
        callback_base_url.trim_end_matches('/'),
        payment_id
    )
}

pub struct PaymentInitializationUseCase<L, G>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    ledger_repo: Arc<L>,
    gateway: Arc<G>,
    callback_base_url: String,
}

impl<L, G> PaymentInitializationUseCase<L, G>
where
    L: LedgerRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(ledger_repo: Arc<L>, gateway: Arc<G>, callback_base_url: String) -> Self {
        Self {
            ledger_repo,
            gateway,
            callback_base_url,
        }
    }

    /// Creates a pending payment, opens a gateway transaction for it and
    /// records the reference together with the initiated leg. The payment row
    /// is written before the gateway call and kept (as `failed`) when the
    /// gateway refuses or the follow-up record cannot be written.
    pub async fn initialize_payment(
        &self,
        owner: PaymentOwner,
        request: InsertPaymentModel,
    ) -> UseCaseResult<PaymentInitializedDto> {
        let user_id = owner.user_id;
        info!(%user_id, amount = %request.amount, "payments: initialize requested");

        let amount = validate_amount(request.amount).map_err(|err| {
            warn!(%user_id, amount = %request.amount, reason = %err, "payments: rejected amount");
            PaymentError::InvalidAmount(err)
        })?;

        let payment_method = request.payment_method.trim().to_string();
        if payment_method.is_empty() {
            return Err(PaymentError::InvalidPaymentMethod("payment method is required"));
        }
        if payment_method.chars().count() > MAX_PAYMENT_METHOD_LEN {
            return Err(PaymentError::InvalidPaymentMethod(
                "payment method must be at most 255 characters",
            ));
        }

        let payment = self
            .ledger_repo
            .create_payment(InsertPaymentEntity {
                user_id,
                payment_method: payment_method.clone(),
                amount,
                status: PaymentStatus::Pending.to_string(),
            })
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "payments: failed to create payment");
                PaymentError::Internal(err)
            })?;
        let payment_id = payment.id;

        let email = owner
            .email
            .filter(|email| !email.trim().is_empty())
            .unwrap_or_else(|| PLACEHOLDER_EMAIL.to_string());
        let metadata = HashMap::from([
            ("payment_id".to_string(), payment_id.to_string()),
            ("user_id".to_string(), user_id.to_string()),
            ("payment_method".to_string(), payment_method),
        ]);

        let initialization = match self
            .gateway
            .initialize(GatewayInitializeRequest {
                amount: payment.amount,
                email,
                callback_url: callback_url(&self.callback_base_url, payment_id),
                metadata,
            })
            .await
        {
            Ok(initialization) => initialization,
            Err(gateway_err) => {
                warn!(
                    %user_id,
                    %payment_id,
                    error = %gateway_err,
                    "payments: gateway initialization failed; marking payment failed"
                );
                let failed = self
                    .ledger_repo
                    .set_payment_status(payment_id, PaymentStatus::Failed)
                    .await
                    .map_err(|err| {
                        error!(
                            %payment_id,
                            db_error = ?err,
                            "payments: failed to mark payment failed after gateway error"
                        );
                        PaymentError::Internal(err)
                    })?;

                return Err(PaymentError::Gateway {
                    payment_status: failed.payment_status()?,
                    detail: gateway_err.to_string(),
                });
            }
        };

        let reference = initialization.reference;
        let record = match self
            .ledger_repo
            .record_initialization(payment_id, &reference, &initialization.authorization_url)
            .await
        {
            Ok(record) => record,
            Err(err) => {
                // The checkout URL is never handed out, so nobody can pay this
                // gateway transaction.
                error!(
                    %payment_id,
                    gateway_reference = %reference,
                    db_error = ?err,
                    "payments: failed to record gateway initialization; marking payment failed"
                );
                if let Err(status_err) = self
                    .ledger_repo
                    .set_payment_status(payment_id, PaymentStatus::Failed)
                    .await
                {
                    error!(
                        %payment_id,
                        db_error = ?status_err,
                        "payments: failed to mark payment failed; sweep will flag it"
                    );
                }
                return Err(PaymentError::Internal(err));
            }
        };

        info!(
            %user_id,
            %payment_id,
            gateway_reference = %reference,
            "payments: payment initialized"
        );

        Ok(PaymentInitializedDto {
            payment: PaymentModel::from_entities(record.payment, vec![record.transaction])?,
            authorization_url: initialization.authorization_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::payment_gateway::MockPaymentGateway;
    use anyhow::anyhow;
    use chrono::Utc;
    use crates::{
        domain::{entities::payments::PaymentEntity, repositories::ledger::MockLedgerRepository},
        infra::db::repositories::in_memory_ledger::InMemoryLedger,
        payments::paystack_client::{GatewayError, PaystackInitialization},
    };
    use rust_decimal_macros::dec;

    const CALLBACK_BASE: &str = "https://api.example.com/";

    fn owner(email: Option<&str>) -> PaymentOwner {
        PaymentOwner {
            user_id: Uuid::new_v4(),
            email: email.map(str::to_string),
        }
    }

    fn request(amount: rust_decimal::Decimal) -> InsertPaymentModel {
        InsertPaymentModel {
            amount,
            payment_method: "Bank Transfer".to_string(),
        }
    }

    fn usecase(
        ledger: &InMemoryLedger,
        gateway: MockPaymentGateway,
    ) -> PaymentInitializationUseCase<InMemoryLedger, MockPaymentGateway> {
        PaymentInitializationUseCase::new(
            Arc::new(ledger.clone()),
            Arc::new(gateway),
            CALLBACK_BASE.to_string(),
        )
    }

    #[tokio::test]
    async fn successful_initialization_leaves_pending_payment_with_one_initiated_leg() {
        let ledger = InMemoryLedger::new();
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initialize()
            .withf(|request| {
                request.amount == dec!(1250.00)
                    && request.email == "foreman@example.com"
                    && request.callback_url.starts_with("https://api.example.com/api/v1/payments/")
                    && request.callback_url.ends_with("/verify")
                    && request.metadata.contains_key("payment_id")
            })
            .times(1)
            .returning(|_| {
                Ok(PaystackInitialization {
                    reference: "ref_001".to_string(),
                    authorization_url: "https://checkout.paystack.com/ref_001".to_string(),
                })
            });

        let initialized = usecase(&ledger, gateway)
            .initialize_payment(owner(Some("foreman@example.com")), request(dec!(1250)))
            .await
            .unwrap();

        assert_eq!(initialized.authorization_url, "https://checkout.paystack.com/ref_001");
        assert_eq!(initialized.payment.status, PaymentStatus::Pending);
        assert_eq!(initialized.payment.gateway_reference.as_deref(), Some("ref_001"));

        let transactions = ledger.all_transactions().await;
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].status, "initiated");
        assert_eq!(transactions[0].gateway_charge_id.as_deref(), Some("ref_001"));
        assert_eq!(transactions[0].amount, dec!(1250.00));
    }

    #[tokio::test]
    async fn callback_url_embeds_the_payment_id() {
        let ledger = InMemoryLedger::new();
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initialize().returning(|request| {
            Ok(PaystackInitialization {
                reference: "ref_cb".to_string(),
                authorization_url: request.callback_url,
            })
        });

        let initialized = usecase(&ledger, gateway)
            .initialize_payment(owner(None), request(dec!(10)))
            .await
            .unwrap();

        assert_eq!(
            initialized.authorization_url,
            format!(
                "https://api.example.com/api/v1/payments/{}/verify",
                initialized.payment.id
            )
        );
    }

    #[tokio::test]
    async fn missing_email_falls_back_to_placeholder() {
        let ledger = InMemoryLedger::new();
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initialize()
            .withf(|request| request.email == PLACEHOLDER_EMAIL)
            .times(1)
            .returning(|_| {
                Ok(PaystackInitialization {
                    reference: "ref_002".to_string(),
                    authorization_url: "https://checkout.paystack.com/ref_002".to_string(),
                })
            });

        usecase(&ledger, gateway)
            .initialize_payment(owner(Some("   ")), request(dec!(99.99)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn zero_amount_is_rejected_before_any_write_or_gateway_call() {
        let ledger = InMemoryLedger::new();
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initialize().times(0);

        let err = usecase(&ledger, gateway)
            .initialize_payment(owner(None), request(dec!(0)))
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::InvalidAmount(_)));
        assert_eq!(err.kind(), "invalid_amount");
        assert_eq!(ledger.payment_count().await, 0);
    }

    #[tokio::test]
    async fn blank_payment_method_is_rejected() {
        let ledger = InMemoryLedger::new();
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initialize().times(0);

        let err = usecase(&ledger, gateway)
            .initialize_payment(
                owner(None),
                InsertPaymentModel {
                    amount: dec!(10),
                    payment_method: " ".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "invalid_payment_method");
        assert_eq!(ledger.payment_count().await, 0);
    }

    #[tokio::test]
    async fn gateway_refusal_keeps_a_failed_payment_without_checkout_url() {
        let ledger = InMemoryLedger::new();
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initialize()
            .times(1)
            .returning(|_| Err(GatewayError::Rejected("Invalid key".to_string())));

        let user = owner(Some("owner@example.com"));
        let user_id = user.user_id;
        let err = usecase(&ledger, gateway)
            .initialize_payment(user, request(dec!(500)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "gateway_error");
        assert_eq!(err.payment_status(), Some(PaymentStatus::Failed));
        assert!(err.to_string().contains("Invalid key"));

        let payments = ledger.list_payments_for_owner(user_id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, "failed");
        assert!(payments[0].gateway_authorization_url.is_none());
        assert!(payments[0].gateway_reference.is_none());
        assert!(ledger.all_transactions().await.is_empty());
    }

    #[tokio::test]
    async fn failed_initialization_record_fails_the_payment_without_checkout_url() {
        let user = owner(Some("owner@example.com"));
        let pending = PaymentEntity {
            id: Uuid::new_v4(),
            user_id: user.user_id,
            payment_method: "Bank Transfer".to_string(),
            amount: dec!(640.00),
            status: PaymentStatus::Pending.to_string(),
            gateway_reference: None,
            gateway_authorization_url: None,
            verification_claimed_by: None,
            verification_claimed_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let failed = PaymentEntity {
            status: PaymentStatus::Failed.to_string(),
            ..pending.clone()
        };

        let mut ledger = MockLedgerRepository::new();
        ledger
            .expect_create_payment()
            .times(1)
            .returning(move |_| Ok(pending.clone()));
        ledger
            .expect_record_initialization()
            .withf(|_, reference, _| reference == "ref_lost")
            .times(1)
            .returning(|_, _, _| Err(anyhow!("duplicate key value violates unique constraint")));
        ledger
            .expect_set_payment_status()
            .withf(|_, status| *status == PaymentStatus::Failed)
            .times(1)
            .returning(move |_, _| Ok(failed.clone()));
        ledger.expect_set_payment_gateway_info().times(0);
        ledger.expect_upsert_transaction().times(0);

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initialize().times(1).returning(|_| {
            Ok(PaystackInitialization {
                reference: "ref_lost".to_string(),
                authorization_url: "https://checkout.paystack.com/ref_lost".to_string(),
            })
        });

        let err = PaymentInitializationUseCase::new(
            Arc::new(ledger),
            Arc::new(gateway),
            CALLBACK_BASE.to_string(),
        )
        .initialize_payment(user, request(dec!(640)))
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "internal");
    }
}
