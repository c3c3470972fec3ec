use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::domain::value_objects::amounts::to_minor_units;

pub const PAYSTACK_BASE_URL: &str = "https://api.paystack.co";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Gateway status that marks a verified, paid transaction.
const SUCCESS_STATUS: &str = "success";

#[derive(Debug, Clone)]
pub struct PaystackClientConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl PaystackClientConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            base_url: PAYSTACK_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Every way a gateway call can fail. Callers treat all of them as a failed
/// attempt; the message is kept for diagnostics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway request timed out: {0}")]
    Timeout(String),
    #[error("gateway unreachable: {0}")]
    Network(String),
    #[error("gateway responded with HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("gateway response could not be parsed: {0}")]
    Malformed(String),
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("amount cannot be sent to the gateway: {0}")]
    AmountConversion(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaystackInitialization {
    pub reference: String,
    pub authorization_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaystackVerification {
    pub succeeded: bool,
    pub raw_status: String,
    /// Amount echoed by the gateway. Informational only.
    pub amount_minor: Option<i64>,
    pub gateway_response: Option<String>,
}

#[derive(Debug, Serialize)]
struct InitializeTransactionBody<'a> {
    email: &'a str,
    amount: u64,
    callback_url: &'a str,
    metadata: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    reference: String,
    authorization_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    amount: Option<i64>,
    gateway_response: Option<String>,
}

/// Minimal Paystack client built on reqwest.
pub struct PaystackClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: Url,
}

impl PaystackClient {
    pub fn new(config: PaystackClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build paystack http client")?;
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid paystack base url: {}", config.base_url))?;

        Ok(Self {
            http,
            secret_key: config.secret_key,
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Network(format!("base url {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn read_envelope<T: DeserializeOwned>(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<T, GatewayError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let gateway_message = serde_json::from_str::<PaystackEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.message);

            error!(
                status = %status,
                gateway_message = ?gateway_message,
                response_body = %body,
                context = %context,
                "paystack api request failed"
            );

            return Err(GatewayError::Http {
                status: status.as_u16(),
                message: gateway_message.unwrap_or_else(|| format!("{context} failed")),
            });
        }

        let envelope: PaystackEnvelope<T> = serde_json::from_str(&body).map_err(|err| {
            warn!(error = %err, context = %context, "paystack response body is malformed");
            GatewayError::Malformed(format!("{context}: {err}"))
        })?;

        if !envelope.status {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("{context} was declined"));
            warn!(context = %context, gateway_message = %message, "paystack reported failure");
            return Err(GatewayError::Rejected(message));
        }

        envelope
            .data
            .ok_or_else(|| GatewayError::Malformed(format!("{context}: response has no data")))
    }

    /// Starts a transaction and returns the reference and the checkout URL.
    /// https://paystack.com/docs/api/transaction/#initialize
    pub async fn initialize_transaction(
        &self,
        amount: Decimal,
        email: &str,
        callback_url: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<PaystackInitialization, GatewayError> {
        let amount_minor = to_minor_units(amount)
            .map_err(|err| GatewayError::AmountConversion(err.to_string()))?;

        let body = InitializeTransactionBody {
            email,
            amount: amount_minor,
            callback_url,
            metadata,
        };

        debug!(amount_minor, callback_url, "paystack: initializing transaction");
        let resp = self
            .http
            .post(self.endpoint(&["transaction", "initialize"])?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let data: InitializeData = Self::read_envelope(resp, "initialize transaction").await?;
        Ok(PaystackInitialization {
            reference: data.reference,
            authorization_url: data.authorization_url,
        })
    }

    /// Asks the gateway for the authoritative state of `reference`.
    /// https://paystack.com/docs/api/transaction/#verify
    pub async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<PaystackVerification, GatewayError> {
        debug!(reference, "paystack: verifying transaction");
        let resp = self
            .http
            .get(self.endpoint(&["transaction", "verify", reference])?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;

        let data: VerifyData = Self::read_envelope(resp, "verify transaction").await?;
        Ok(PaystackVerification {
            succeeded: data.status == SUCCESS_STATUS,
            raw_status: data.status,
            amount_minor: data.amount,
            gateway_response: data.gateway_response,
        })
    }
}
