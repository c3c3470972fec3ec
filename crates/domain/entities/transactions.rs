use anyhow::Context;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::transaction_statuses::TransactionStatus,
    infra::db::postgres::schema::transactions,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = transactions)]
pub struct TransactionEntity {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub status: String,
    pub gateway_charge_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transactions)]
pub struct InsertTransactionEntity {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub status: String,
    pub gateway_charge_id: Option<String>,
}

impl TransactionEntity {
    pub fn transaction_status(&self) -> anyhow::Result<TransactionStatus> {
        self.status
            .parse::<TransactionStatus>()
            .with_context(|| format!("transaction {} has an unreadable status", self.id))
    }
}
