use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;

use serde::{Deserialize, Serialize};

use super::payment_statuses::PaymentStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Initiated,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Transaction leg status recorded when a payment settles into `status`.
    pub fn settled_from(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Completed => Some(TransactionStatus::Completed),
            PaymentStatus::Failed => Some(TransactionStatus::Failed),
            PaymentStatus::Pending => None,
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "initiated" => Ok(TransactionStatus::Initiated),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(anyhow!("unknown transaction status {other:?}")),
        }
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
