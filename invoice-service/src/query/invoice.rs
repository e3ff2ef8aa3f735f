use super::spec::{JoinKind, Predicate, QuerySpec, Table};
use super::{PaymentHistoryQuery, PaymentSubmissionQuery};
use crate::models::{InvoiceStatus, InvoiceType, TeamType};

/// Filter on the `has_submission` flag. `Any` leaves the query untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionFilter {
    #[default]
    Any,
    Have,
    No,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceQuery {
    spec: QuerySpec,
}

impl InvoiceQuery {
    /// `lock` selects rows with `FOR UPDATE NOWAIT`.
    pub fn new(lock: bool) -> Self {
        Self {
            spec: QuerySpec::new(Table::Invoice, lock),
        }
    }

    pub(crate) fn from_spec(spec: QuerySpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn with_ids(mut self, ids: &[i64]) -> Self {
        if !ids.is_empty() {
            self.spec.filter(Predicate::InvoiceIds(ids.to_vec()));
        }
        self
    }

    pub fn from_team(mut self, team_id: i64) -> Self {
        if team_id != 0 {
            self.spec.filter(Predicate::FromTeam(team_id));
        }
        self
    }

    /// Joins `teams AS from_team` if not already joined.
    pub fn from_team_type(mut self, team_type: impl Into<Option<TeamType>>) -> Self {
        if let Some(team_type) = team_type.into() {
            self.spec.filter(Predicate::FromTeamType(team_type));
        }
        self
    }

    pub fn to_team(mut self, team_id: i64) -> Self {
        if team_id != 0 {
            self.spec.filter(Predicate::ToTeam(team_id));
        }
        self
    }

    /// Joins `teams AS to_team` if not already joined.
    pub fn to_team_type(mut self, team_type: impl Into<Option<TeamType>>) -> Self {
        if let Some(team_type) = team_type.into() {
            self.spec.filter(Predicate::ToTeamType(team_type));
        }
        self
    }

    pub fn status(mut self, status: impl Into<Option<InvoiceStatus>>) -> Self {
        if let Some(status) = status.into() {
            self.spec.filter(Predicate::Status(status));
        }
        self
    }

    pub fn statuses(mut self, statuses: &[InvoiceStatus]) -> Self {
        if !statuses.is_empty() {
            self.spec.filter(Predicate::StatusIn(statuses.to_vec()));
        }
        self
    }

    pub fn exclude_statuses(mut self, statuses: &[InvoiceStatus]) -> Self {
        if !statuses.is_empty() {
            self.spec.filter(Predicate::StatusNotIn(statuses.to_vec()));
        }
        self
    }

    pub fn with_type(mut self, invoice_type: impl Into<Option<InvoiceType>>) -> Self {
        if let Some(invoice_type) = invoice_type.into() {
            self.spec.filter(Predicate::Kind(invoice_type));
        }
        self
    }

    pub fn has_submission(mut self, filter: SubmissionFilter) -> Self {
        match filter {
            SubmissionFilter::Any => {}
            SubmissionFilter::Have => self.spec.filter(Predicate::HasSubmission(true)),
            SubmissionFilter::No => self.spec.filter(Predicate::HasSubmission(false)),
        }
        self
    }

    pub fn tx_id(mut self, tx_id: i64) -> Self {
        if tx_id != 0 {
            self.spec.filter(Predicate::TxId(tx_id));
        }
        self
    }

    pub fn order_id(mut self, order_id: i64) -> Self {
        if order_id != 0 {
            self.spec.filter(Predicate::OrderId(order_id));
        }
        self
    }

    pub fn join_from_team(mut self, kind: JoinKind) -> Self {
        self.spec.join(Table::FromTeam, kind);
        self
    }

    pub fn join_to_team(mut self, kind: JoinKind) -> Self {
        self.spec.join(Table::ToTeam, kind);
        self
    }

    /// Pivot to the submissions these invoices are linked to.
    pub fn join_payment_submission(self, kind: JoinKind) -> PaymentSubmissionQuery {
        PaymentSubmissionQuery::from_spec(self.spec.pivot(
            Table::PaymentSubmission,
            &[Table::InvoiceSubmission, Table::PaymentSubmission],
            kind,
        ))
    }

    /// Pivot to the payment histories that settled these invoices.
    pub fn join_payment_histories(self, kind: JoinKind) -> PaymentHistoryQuery {
        PaymentHistoryQuery::from_spec(self.spec.pivot(
            Table::PaymentHistory,
            &[Table::PaymentHistory],
            kind,
        ))
    }
}
