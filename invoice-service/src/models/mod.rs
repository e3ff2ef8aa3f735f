//! Domain models for invoice-service.

mod agent;
mod history;
mod invoice;
mod limit;
mod submission;
mod team;

pub use agent::{Agent, AgentKind};
pub use history::{NewPaymentHistory, PaymentHistory};
pub use invoice::{Invoice, InvoiceStatus, InvoiceType, NewInvoice, PaidUpdate};
pub use limit::{
    DeterminedLimit, InvoiceLimitConfiguration, LimitInvoiceItem, LimitType,
    SetLimitInvoice, TeamInvoiceStatus, TeamLimitInvoice,
};
pub use submission::{
    InvoiceSubmissionLink, NewPaymentSubmission, NewPaymentSubmissionLog, PaymentSubmission,
    PaymentSubmissionLog, SubmissionStatus,
};
pub use team::{Team, TeamType};

use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a stored enum column holds a value this build does not know.
#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Decode a TEXT column into one of the string-backed model enums.
pub(crate) fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: UnknownVariant| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
