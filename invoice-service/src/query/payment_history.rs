use super::spec::{JoinKind, Predicate, QuerySpec, Table};
use super::InvoiceQuery;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentHistoryQuery {
    spec: QuerySpec,
}

impl PaymentHistoryQuery {
    pub fn new(lock: bool) -> Self {
        Self {
            spec: QuerySpec::new(Table::PaymentHistory, lock),
        }
    }

    pub(crate) fn from_spec(spec: QuerySpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn created_at(mut self, min: Option<DateTime<Utc>>, max: Option<DateTime<Utc>>) -> Self {
        if let Some(min) = min {
            self.spec.filter(Predicate::HistoryCreatedFrom(min));
        }
        if let Some(max) = max {
            self.spec.filter(Predicate::HistoryCreatedUntil(max));
        }
        self
    }

    /// Pivot to the invoices settled by these histories.
    pub fn join_invoice(self, kind: JoinKind) -> InvoiceQuery {
        InvoiceQuery::from_spec(self.spec.pivot(Table::Invoice, &[Table::Invoice], kind))
    }
}
