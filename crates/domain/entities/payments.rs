use anyhow::Context;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    domain::value_objects::enums::payment_statuses::PaymentStatus,
    infra::db::postgres::schema::payments,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payments)]
pub struct PaymentEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_method: String,
    pub amount: Decimal,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub gateway_authorization_url: Option<String>,
    pub verification_claimed_by: Option<Uuid>,
    pub verification_claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payments)]
pub struct InsertPaymentEntity {
    pub user_id: Uuid,
    pub payment_method: String,
    pub amount: Decimal,
    pub status: String,
}

impl PaymentEntity {
    pub fn payment_status(&self) -> anyhow::Result<PaymentStatus> {
        self.status
            .parse::<PaymentStatus>()
            .with_context(|| format!("payment {} has an unreadable status", self.id))
    }

    /// True while a different caller holds an unexpired verification lease.
    pub fn verification_claimed_elsewhere(&self, claimant: Uuid, now: DateTime<Utc>) -> bool {
        match (self.verification_claimed_by, self.verification_claimed_until) {
            (Some(holder), Some(until)) => holder != claimant && until > now,
            _ => false,
        }
    }
}
