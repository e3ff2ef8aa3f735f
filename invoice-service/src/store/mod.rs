//! Persistence seams for the ledger.
//!
//! Store implementations are bound to one transactional session owned by the
//! caller. Services never begin, commit or roll back.

mod memory;
mod postgres;

pub use memory::{MemoryLedger, MemorySession};
pub use postgres::PgStore;

use crate::models::{
    Invoice, InvoiceLimitConfiguration, InvoiceStatus, LimitType, NewInvoice, NewPaymentHistory,
    NewPaymentSubmission, NewPaymentSubmissionLog, PaidUpdate, PaymentHistory, PaymentSubmission,
    PaymentSubmissionLog, SubmissionStatus, Team, TeamInvoiceStatus,
};
use crate::query::{InvoiceQuery, PaymentHistoryQuery, PaymentSubmissionQuery};
use crate::services::error::LedgerError;
use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait LedgerStore: Send {
    /// Invoices ordered oldest first (`created`, then `id`).
    async fn find_invoices(&mut self, query: &InvoiceQuery) -> Result<Vec<Invoice>, LedgerError>;

    async fn find_submissions(
        &mut self,
        query: &PaymentSubmissionQuery,
    ) -> Result<Vec<PaymentSubmission>, LedgerError>;

    async fn find_histories(
        &mut self,
        query: &PaymentHistoryQuery,
    ) -> Result<Vec<PaymentHistory>, LedgerError>;

    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Invoice, LedgerError>;

    async fn update_invoice_status(
        &mut self,
        invoice_id: i64,
        status: InvoiceStatus,
    ) -> Result<u64, LedgerError>;

    async fn set_has_submission(
        &mut self,
        invoice_ids: &[i64],
        has_submission: bool,
    ) -> Result<u64, LedgerError>;

    /// Settles the given invoices, touching only rows still `not_paid`.
    async fn mark_invoices_paid(
        &mut self,
        invoice_ids: &[i64],
        update: &PaidUpdate,
    ) -> Result<u64, LedgerError>;

    async fn insert_submission(
        &mut self,
        submission: &NewPaymentSubmission,
    ) -> Result<PaymentSubmission, LedgerError>;

    async fn link_invoices(
        &mut self,
        submission_id: i64,
        invoice_ids: &[i64],
    ) -> Result<(), LedgerError>;

    async fn update_submission_status(
        &mut self,
        submission_id: i64,
        status: SubmissionStatus,
        completed_by_id: i64,
    ) -> Result<u64, LedgerError>;

    async fn insert_submission_log(
        &mut self,
        log: &NewPaymentSubmissionLog,
    ) -> Result<PaymentSubmissionLog, LedgerError>;

    async fn insert_history(
        &mut self,
        history: &NewPaymentHistory,
    ) -> Result<PaymentHistory, LedgerError>;
}

#[async_trait]
pub trait TeamDirectory: Send {
    async fn get_team(&mut self, team_id: i64) -> Result<Option<Team>, LedgerError>;

    async fn teams_by_ids(&mut self, team_ids: &[i64]) -> Result<Vec<Team>, LedgerError>;
}

#[async_trait]
pub trait LimitStore: TeamDirectory {
    /// Sum of `not_paid` invoices owed by `from_team_id` to `to_team_id`.
    async fn unpaid_amount(
        &mut self,
        from_team_id: i64,
        to_team_id: i64,
    ) -> Result<Decimal, LedgerError>;

    /// The team's DEFAULT row plus its TEAM row for `for_team_id`, if any.
    async fn applicable_limits(
        &mut self,
        team_id: i64,
        for_team_id: i64,
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError>;

    async fn find_limit(
        &mut self,
        team_id: i64,
        limit_type: LimitType,
        for_team_id: Option<i64>,
    ) -> Result<Option<InvoiceLimitConfiguration>, LedgerError>;

    /// Inserts when `id` is 0, otherwise updates the threshold.
    async fn save_limit(
        &mut self,
        config: &InvoiceLimitConfiguration,
    ) -> Result<InvoiceLimitConfiguration, LedgerError>;

    async fn delete_limits(
        &mut self,
        team_id: i64,
        for_team_id: Option<i64>,
    ) -> Result<u64, LedgerError>;

    async fn list_limits(
        &mut self,
        team_id: i64,
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError>;

    /// Rows where `for_team_id` is the given team and `team_id` is one of `team_ids`.
    async fn limits_for_counterpart(
        &mut self,
        for_team_id: i64,
        team_ids: &[i64],
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError>;

    /// Per creditor, `not_paid` debt owed by `from_team_id`.
    async fn team_invoice_status(
        &mut self,
        from_team_id: i64,
        to_team_ids: &[i64],
    ) -> Result<Vec<TeamInvoiceStatus>, LedgerError>;
}
