//! Payment submission, its invoice links and its audit log.

use super::{parse_column, AgentKind, UnknownVariant};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

/// Submission lifecycle: `Submitted` → `Accepted` | `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    Accepted,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Accepted | SubmissionStatus::Rejected)
    }
}

impl FromStr for SubmissionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(SubmissionStatus::Submitted),
            "accepted" => Ok(SubmissionStatus::Accepted),
            "rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(UnknownVariant::new("submission status", other)),
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSubmission {
    pub id: i64,
    pub created_by_id: i64,
    pub completed_by_id: Option<i64>,
    pub status: SubmissionStatus,
    pub amount: Decimal,
    pub receipt: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PaymentSubmission {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            created_by_id: row.try_get("created_by_id")?,
            completed_by_id: row.try_get("completed_by_id")?,
            status: parse_column(row, "status")?,
            amount: row.try_get("amount")?,
            receipt: row.try_get("receipt")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentSubmission {
    pub created_by_id: i64,
    pub amount: Decimal,
    pub receipt: String,
    pub created_at: DateTime<Utc>,
}

/// Row of the `invoice_payment_submission` link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InvoiceSubmissionLink {
    pub invoice_id: i64,
    pub payment_submission_id: i64,
}

/// Append-only record of one submission status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSubmissionLog {
    pub id: i64,
    pub payment_submission_id: i64,
    pub status: SubmissionStatus,
    pub from_agent: AgentKind,
    pub by_user_id: i64,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PaymentSubmissionLog {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            payment_submission_id: row.try_get("payment_submission_id")?,
            status: parse_column(row, "status")?,
            from_agent: parse_column(row, "from_agent")?,
            by_user_id: row.try_get("by_user_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentSubmissionLog {
    pub payment_submission_id: i64,
    pub status: SubmissionStatus,
    pub from_agent: AgentKind,
    pub by_user_id: i64,
    pub created_at: DateTime<Utc>,
}
