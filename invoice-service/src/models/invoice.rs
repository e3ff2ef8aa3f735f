//! Invoice model for invoice-service.

use super::{parse_column, UnknownVariant};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

/// Invoice type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    ShipFee,
    Product,
    WarehouseFee,
    WarehouseAdjustment,
    ProductAdjustment,
    CommonAdjustment,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::ShipFee => "ship_fee",
            InvoiceType::Product => "product",
            InvoiceType::WarehouseFee => "warehouse_fee",
            InvoiceType::WarehouseAdjustment => "warehouse_adjustment",
            InvoiceType::ProductAdjustment => "product_adjustment",
            InvoiceType::CommonAdjustment => "common_adjustment",
        }
    }

    /// Adjustment-class invoices are never adjusted again.
    pub fn is_adjustment(&self) -> bool {
        matches!(
            self,
            InvoiceType::WarehouseAdjustment
                | InvoiceType::ProductAdjustment
                | InvoiceType::CommonAdjustment
        )
    }

    /// Type of the compensating invoice created when this invoice is settled.
    pub fn adjustment_type(&self) -> InvoiceType {
        match self {
            InvoiceType::Product => InvoiceType::ProductAdjustment,
            InvoiceType::WarehouseFee => InvoiceType::WarehouseAdjustment,
            InvoiceType::ShipFee => InvoiceType::CommonAdjustment,
            adjustment => *adjustment,
        }
    }
}

impl FromStr for InvoiceType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ship_fee" => Ok(InvoiceType::ShipFee),
            "product" => Ok(InvoiceType::Product),
            "warehouse_fee" => Ok(InvoiceType::WarehouseFee),
            "warehouse_adjustment" => Ok(InvoiceType::WarehouseAdjustment),
            "product_adjustment" => Ok(InvoiceType::ProductAdjustment),
            "common_adjustment" => Ok(InvoiceType::CommonAdjustment),
            other => Err(UnknownVariant::new("invoice type", other)),
        }
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    NotFinal,
    NotPaid,
    Paid,
    Cancel,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::NotFinal => "not_final",
            InvoiceStatus::NotPaid => "not_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancel => "cancel",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_final" => Ok(InvoiceStatus::NotFinal),
            "not_paid" => Ok(InvoiceStatus::NotPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancel" => Ok(InvoiceStatus::Cancel),
            other => Err(UnknownVariant::new("invoice status", other)),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed debt from one team to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub from_team_id: i64,
    pub to_team_id: i64,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub amount: Decimal,
    pub tx_id: Option<i64>,
    pub order_id: Option<i64>,
    pub has_submission: bool,
    pub need_adjustment: bool,
    pub hist_id: Option<i64>,
    pub created: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for Invoice {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            from_team_id: row.try_get("from_team_id")?,
            to_team_id: row.try_get("to_team_id")?,
            invoice_type: parse_column(row, "type")?,
            status: parse_column(row, "status")?,
            amount: row.try_get("amount")?,
            tx_id: row.try_get("tx_id")?,
            order_id: row.try_get("order_id")?,
            has_submission: row.try_get("has_submission")?,
            need_adjustment: row.try_get("need_adjustment")?,
            hist_id: row.try_get("hist_id")?,
            created: row.try_get("created")?,
            paid_at: row.try_get("paid_at")?,
            accepted_at: row.try_get("accepted_at")?,
        })
    }
}

/// Input for inserting an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub from_team_id: i64,
    pub to_team_id: i64,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub amount: Decimal,
    pub tx_id: Option<i64>,
    pub order_id: Option<i64>,
    pub need_adjustment: bool,
    pub created: DateTime<Utc>,
}

impl NewInvoice {
    pub fn new(from_team_id: i64, to_team_id: i64, invoice_type: InvoiceType, amount: Decimal) -> Self {
        Self {
            from_team_id,
            to_team_id,
            invoice_type,
            status: InvoiceStatus::NotPaid,
            amount,
            tx_id: None,
            order_id: None,
            need_adjustment: false,
            created: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: InvoiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tx_id(mut self, tx_id: Option<i64>) -> Self {
        self.tx_id = tx_id;
        self
    }

    pub fn with_order_id(mut self, order_id: Option<i64>) -> Self {
        self.order_id = order_id;
        self
    }

    pub fn with_need_adjustment(mut self, need_adjustment: bool) -> Self {
        self.need_adjustment = need_adjustment;
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }
}

/// Settlement stamp applied to invoices when a submission is accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaidUpdate {
    pub hist_id: i64,
    pub paid_at: DateTime<Utc>,
    pub accepted_at: DateTime<Utc>,
}
