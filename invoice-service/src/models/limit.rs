//! Credit-limit configuration and evaluation results.

use super::{parse_column, Team, UnknownVariant};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

/// `Team` rows apply to one counterpart and override the team's `Default` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitType {
    Default,
    Team,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Default => "DEFAULT",
            LimitType::Team => "TEAM",
        }
    }
}

impl FromStr for LimitType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEFAULT" => Ok(LimitType::Default),
            "TEAM" => Ok(LimitType::Team),
            other => Err(UnknownVariant::new("limit type", other)),
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLimitConfiguration {
    pub id: i64,
    pub team_id: i64,
    pub limit_type: LimitType,
    pub for_team_id: Option<i64>,
    pub threshold: Decimal,
}

impl<'r> FromRow<'r, PgRow> for InvoiceLimitConfiguration {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            team_id: row.try_get("team_id")?,
            limit_type: parse_column(row, "limit_type")?,
            for_team_id: row.try_get("for_team_id")?,
            threshold: row.try_get("threshold")?,
        })
    }
}

/// Request to upsert a limit. `for_team_id = None` targets the DEFAULT row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetLimitInvoice {
    pub team_id: i64,
    pub for_team_id: Option<i64>,
    pub threshold: Decimal,
}

/// Outcome of evaluating whether `for_team_id` may take on more debt to `team_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamLimitInvoice {
    pub team_id: i64,
    pub for_team_id: i64,
    pub unpaid_amount: Decimal,
    pub threshold: Decimal,
    pub limit_type: Option<LimitType>,
    pub can_create_order: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitInvoiceItem {
    pub config: InvoiceLimitConfiguration,
    pub team: Option<Team>,
    pub for_team: Option<Team>,
}

/// Unpaid debt owed to `to_team_id`, split by whether it is already in a submission.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, FromRow)]
pub struct TeamInvoiceStatus {
    pub to_team_id: i64,
    pub total: Decimal,
    pub unpaid_amount: Decimal,
    pub submission_amount: Decimal,
}

impl TeamInvoiceStatus {
    pub fn empty(to_team_id: i64) -> Self {
        Self {
            to_team_id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterminedLimit {
    pub config: InvoiceLimitConfiguration,
    pub team: Option<Team>,
    pub for_team: Option<Team>,
    pub invoice_status: TeamInvoiceStatus,
}
