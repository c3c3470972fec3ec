use std::collections::HashMap;

use async_trait::async_trait;
use crates::payments::paystack_client::{
    GatewayError, PaystackClient, PaystackInitialization, PaystackVerification,
};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayInitializeRequest {
    /// Currency units; the client converts to minor units.
    pub amount: Decimal,
    pub email: String,
    pub callback_url: String,
    pub metadata: HashMap<String, String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(
        &self,
        request: GatewayInitializeRequest,
    ) -> Result<PaystackInitialization, GatewayError>;

    async fn verify(&self, reference: &str) -> Result<PaystackVerification, GatewayError>;
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn initialize(
        &self,
        request: GatewayInitializeRequest,
    ) -> Result<PaystackInitialization, GatewayError> {
        self.initialize_transaction(
            request.amount,
            &request.email,
            &request.callback_url,
            &request.metadata,
        )
        .await
    }

    async fn verify(&self, reference: &str) -> Result<PaystackVerification, GatewayError> {
        self.verify_transaction(reference).await
    }
}
