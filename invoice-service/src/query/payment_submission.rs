use super::spec::{JoinKind, Predicate, QuerySpec, Table};
use super::InvoiceQuery;
use crate::models::SubmissionStatus;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSubmissionQuery {
    spec: QuerySpec,
}

impl PaymentSubmissionQuery {
    pub fn new(lock: bool) -> Self {
        Self {
            spec: QuerySpec::new(Table::PaymentSubmission, lock),
        }
    }

    pub(crate) fn from_spec(spec: QuerySpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn with_submission(mut self, submission_id: i64) -> Self {
        if submission_id != 0 {
            self.spec.filter(Predicate::SubmissionId(submission_id));
        }
        self
    }

    pub fn created_by(mut self, user_id: i64) -> Self {
        if user_id != 0 {
            self.spec.filter(Predicate::CreatedBy(user_id));
        }
        self
    }

    /// Filter on the user who accepted or rejected the submission.
    pub fn verify_by(mut self, user_id: i64) -> Self {
        if user_id != 0 {
            self.spec.filter(Predicate::VerifiedBy(user_id));
        }
        self
    }

    pub fn with_status(mut self, status: impl Into<Option<SubmissionStatus>>) -> Self {
        if let Some(status) = status.into() {
            self.spec.filter(Predicate::SubmissionState(status));
        }
        self
    }

    /// Inclusive creation window; either bound may be omitted.
    pub fn created_at(mut self, min: Option<DateTime<Utc>>, max: Option<DateTime<Utc>>) -> Self {
        if let Some(min) = min {
            self.spec.filter(Predicate::SubmissionCreatedFrom(min));
        }
        if let Some(max) = max {
            self.spec.filter(Predicate::SubmissionCreatedUntil(max));
        }
        self
    }

    /// Pivot to the invoices linked to these submissions.
    pub fn join_invoice(self, kind: JoinKind) -> InvoiceQuery {
        InvoiceQuery::from_spec(self.spec.pivot(
            Table::Invoice,
            &[Table::InvoiceSubmission, Table::Invoice],
            kind,
        ))
    }
}
