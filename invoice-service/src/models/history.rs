//! Payment history: one row per accepted settlement batch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PaymentHistory {
    pub id: i64,
    pub amount: Decimal,
    pub created_by_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentHistory {
    pub amount: Decimal,
    pub created_by_id: i64,
    pub created_at: DateTime<Utc>,
}
