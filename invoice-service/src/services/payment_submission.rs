//! Payment submission workflow: `submitted` → `accepted` | `rejected`.
//!
//! A submission batches unpaid invoices owed by one team into a single
//! payable amount. Acceptance settles every linked invoice under one payment
//! history and emits compensating adjustments; rejection frees the invoices
//! for a later submission.

use crate::models::{
    Agent, Invoice, InvoiceStatus, NewPaymentHistory, NewPaymentSubmission,
    NewPaymentSubmissionLog, PaidUpdate, PaymentHistory, PaymentSubmission, SubmissionStatus,
};
use crate::query::{InvoiceQuery, JoinKind, PaymentSubmissionQuery};
use crate::services::adjustment::create_adjustments;
use crate::services::error::LedgerError;
use crate::store::LedgerStore;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptOutcome {
    pub history: PaymentHistory,
    pub paid_invoice_ids: Vec<i64>,
    pub adjustments: Vec<Invoice>,
}

/// Pick invoices oldest first until their sum reaches `target`.
///
/// Invoices in `active` already belong to a submitted batch and are skipped.
/// Cancelled invoices are ignored; `not_final` or `paid` invoices abort the
/// selection.
pub fn select_invoices(
    invoices: &[Invoice],
    active: &HashSet<i64>,
    target: Decimal,
) -> Result<Vec<i64>, LedgerError> {
    let mut total = Decimal::ZERO;
    let mut selected = Vec::new();

    for invoice in invoices {
        match invoice.status {
            InvoiceStatus::NotFinal => {
                return Err(LedgerError::Consistency(format!(
                    "invoice {} is not final",
                    invoice.id
                )));
            }
            InvoiceStatus::Paid => {
                return Err(LedgerError::Consistency(format!(
                    "invoice {} has been paid",
                    invoice.id
                )));
            }
            InvoiceStatus::Cancel => continue,
            InvoiceStatus::NotPaid => {
                if active.contains(&invoice.id) {
                    continue;
                }
                total += invoice.amount;
                if total > target {
                    return Err(LedgerError::Amount(format!(
                        "invalid payment amount {}: invoice {} overshoots it",
                        target, invoice.id
                    )));
                }
                selected.push(invoice.id);
            }
        }

        if total == target {
            break;
        }
    }

    if total < target {
        return Err(LedgerError::Amount(format!(
            "invalid payment amount {}: only {} is payable",
            target, total
        )));
    }
    if selected.is_empty() {
        return Err(LedgerError::Amount(
            "there are no unpaid invoices to submit".to_string(),
        ));
    }

    Ok(selected)
}

pub struct PaymentSubmissionMutation<'s, S: LedgerStore> {
    store: &'s mut S,
    agent: Agent,
    data: Option<PaymentSubmission>,
    transitions: Vec<SubmissionStatus>,
}

impl<'s, S: LedgerStore> PaymentSubmissionMutation<'s, S> {
    pub fn new(store: &'s mut S, agent: Agent) -> Self {
        Self {
            store,
            agent,
            data: None,
            transitions: Vec::new(),
        }
    }

    pub fn with_submission(store: &'s mut S, agent: Agent, submission: PaymentSubmission) -> Self {
        Self {
            store,
            agent,
            data: Some(submission),
            transitions: Vec::new(),
        }
    }

    pub fn data(&self) -> Option<&PaymentSubmission> {
        self.data.as_ref()
    }

    /// Statuses this workflow has written, in order. They only count once the
    /// caller's transaction commits; see
    /// [`record_submission_transitions`](crate::services::metrics::record_submission_transitions).
    pub fn transitions(&self) -> &[SubmissionStatus] {
        &self.transitions
    }

    fn loaded(&self) -> Result<&PaymentSubmission, LedgerError> {
        self.data.as_ref().ok_or_else(|| {
            LedgerError::Consistency("payment submission is not loaded".to_string())
        })
    }

    /// Load the first submission matching `query`.
    #[instrument(skip(self, query))]
    pub async fn load_from_query(
        &mut self,
        query: &PaymentSubmissionQuery,
    ) -> Result<PaymentSubmission, LedgerError> {
        let submission = self
            .store
            .find_submissions(query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::NotFound("payment submission".to_string()))?;

        self.data = Some(submission.clone());
        Ok(submission)
    }

    /// Batch unpaid invoices from `query` into a new submission of `amount`.
    /// An amount of zero submits the sum of every loaded invoice.
    #[instrument(skip(self, query, receipt), fields(amount = %amount, user_id = self.agent.user_id))]
    pub async fn create_submission(
        &mut self,
        query: &InvoiceQuery,
        receipt: &str,
        amount: Decimal,
    ) -> Result<PaymentSubmission, LedgerError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(LedgerError::Validation(format!(
                "payment amount {} must not be negative",
                amount
            )));
        }

        let invoices = self.store.find_invoices(query).await?;
        let target = if amount.is_zero() {
            invoices.iter().map(|i| i.amount).sum()
        } else {
            amount
        };

        let active = self.active_invoice_ids(&invoices).await?;
        let selected = select_invoices(&invoices, &active, target)?;

        let submission = self
            .store
            .insert_submission(&NewPaymentSubmission {
                created_by_id: self.agent.user_id,
                amount: target,
                receipt: receipt.to_string(),
                created_at: Utc::now(),
            })
            .await?;

        self.store.set_has_submission(&selected, true).await?;
        self.store.link_invoices(submission.id, &selected).await?;

        self.data = Some(submission.clone());
        self.create_log(SubmissionStatus::Submitted).await?;
        self.transitions.push(SubmissionStatus::Submitted);

        info!(
            submission_id = submission.id,
            invoice_count = selected.len(),
            amount = %submission.amount,
            "Payment submission created"
        );

        Ok(submission)
    }

    /// Submit every eligible invoice from `query` at its full sum.
    pub async fn create_submission_from_invoices(
        &mut self,
        query: &InvoiceQuery,
        receipt: &str,
    ) -> Result<PaymentSubmission, LedgerError> {
        self.create_submission(query, receipt, Decimal::ZERO).await
    }

    async fn active_invoice_ids(
        &mut self,
        invoices: &[Invoice],
    ) -> Result<HashSet<i64>, LedgerError> {
        if invoices.is_empty() {
            return Ok(HashSet::new());
        }

        let ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        let query = InvoiceQuery::new(false)
            .with_ids(&ids)
            .join_payment_submission(JoinKind::Inner)
            .with_status(SubmissionStatus::Submitted)
            .join_invoice(JoinKind::Inner);

        Ok(self
            .store
            .find_invoices(&query)
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect())
    }

    /// Settle the loaded submission.
    #[instrument(skip(self), fields(user_id = self.agent.user_id))]
    pub async fn accept_submission(&mut self) -> Result<AcceptOutcome, LedgerError> {
        let submission = self.loaded()?.clone();
        if submission.status != SubmissionStatus::Submitted {
            return Err(LedgerError::Consistency(format!(
                "payment submission {} is {}",
                submission.id, submission.status
            )));
        }

        let linked = self
            .store
            .find_invoices(
                &PaymentSubmissionQuery::new(true)
                    .with_submission(submission.id)
                    .join_invoice(JoinKind::Inner),
            )
            .await?;

        let mut payable = Vec::with_capacity(linked.len());
        let mut payable_total = Decimal::ZERO;
        let mut needs_adjustment = Vec::new();
        for invoice in &linked {
            match invoice.status {
                InvoiceStatus::NotFinal => {
                    return Err(LedgerError::Consistency(format!(
                        "invoice {} is not final",
                        invoice.id
                    )));
                }
                InvoiceStatus::Paid => {
                    return Err(LedgerError::Consistency(format!(
                        "invoice {} has been paid",
                        invoice.id
                    )));
                }
                InvoiceStatus::Cancel => {}
                InvoiceStatus::NotPaid => {
                    payable.push(invoice.id);
                    payable_total += invoice.amount;
                    if invoice.need_adjustment && !invoice.invoice_type.is_adjustment() {
                        needs_adjustment.push(invoice.clone());
                    }
                }
            }
        }

        if payable_total != submission.amount {
            return Err(LedgerError::Amount(format!(
                "payment submission {} declares {} but its unpaid invoices sum to {}",
                submission.id, submission.amount, payable_total
            )));
        }

        self.update_status(SubmissionStatus::Accepted).await?;

        let now = Utc::now();
        let history = self
            .store
            .insert_history(&NewPaymentHistory {
                amount: submission.amount,
                created_by_id: self.agent.user_id,
                created_at: now,
            })
            .await?;

        self.store
            .mark_invoices_paid(
                &payable,
                &PaidUpdate {
                    hist_id: history.id,
                    paid_at: submission.created_at,
                    accepted_at: now,
                },
            )
            .await?;

        let adjustments = create_adjustments(self.store, &needs_adjustment).await?;

        info!(
            submission_id = submission.id,
            hist_id = history.id,
            paid = payable.len(),
            adjustments = adjustments.len(),
            "Payment submission accepted"
        );

        Ok(AcceptOutcome {
            history,
            paid_invoice_ids: payable,
            adjustments,
        })
    }

    /// Reject the loaded submission and release its invoices. Link rows stay.
    #[instrument(skip(self), fields(user_id = self.agent.user_id))]
    pub async fn reject_submission(&mut self) -> Result<u64, LedgerError> {
        self.update_status(SubmissionStatus::Rejected).await?;
        let submission_id = self.loaded()?.id;

        let linked = self
            .store
            .find_invoices(
                &PaymentSubmissionQuery::new(false)
                    .with_submission(submission_id)
                    .join_invoice(JoinKind::Inner),
            )
            .await?;
        let ids: Vec<i64> = linked.iter().map(|i| i.id).collect();
        let released = self.store.set_has_submission(&ids, false).await?;

        info!(submission_id, released, "Payment submission rejected");

        Ok(released)
    }

    /// Move the loaded submission to `status` and record the transition.
    #[instrument(skip(self), fields(user_id = self.agent.user_id))]
    pub async fn update_status(&mut self, status: SubmissionStatus) -> Result<(), LedgerError> {
        let current = self.loaded()?;
        if current.status.is_terminal() {
            return Err(LedgerError::Consistency(format!(
                "payment submission {} is already {}",
                current.id, current.status
            )));
        }
        let submission_id = current.id;

        let updated = self
            .store
            .update_submission_status(submission_id, status, self.agent.user_id)
            .await?;
        if updated == 0 {
            return Err(LedgerError::NotFound(format!(
                "payment submission {}",
                submission_id
            )));
        }

        if let Some(data) = self.data.as_mut() {
            data.status = status;
            data.completed_by_id = Some(self.agent.user_id);
        }

        self.create_log(status).await?;
        self.transitions.push(status);

        Ok(())
    }

    async fn create_log(&mut self, status: SubmissionStatus) -> Result<(), LedgerError> {
        let submission_id = self.loaded()?.id;
        self.store
            .insert_submission_log(&NewPaymentSubmissionLog {
                payment_submission_id: submission_id,
                status,
                from_agent: self.agent.kind,
                by_user_id: self.agent.user_id,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
