//! Backend-neutral description of a ledger query.
//!
//! A [`QuerySpec`] names the root entity whose rows are returned, the set of
//! tables joined to it, the filter predicates and the lock mode. The Postgres
//! store renders it to SQL; the in-memory store evaluates it directly.

use crate::models::{InvoiceStatus, InvoiceType, SubmissionStatus, TeamType};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Tables reachable from an invoice query.
///
/// The join graph is a tree centered on `invoices`, so the ON clause for any
/// pair of adjacent tables is the same in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Invoice,
    InvoiceSubmission,
    PaymentSubmission,
    PaymentHistory,
    FromTeam,
    ToTeam,
}

impl Table {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Table reference used in FROM/JOIN position.
    pub fn source(self) -> &'static str {
        match self {
            Table::Invoice => "invoices",
            Table::InvoiceSubmission => "invoice_payment_submission",
            Table::PaymentSubmission => "payment_submissions",
            Table::PaymentHistory => "payment_histories",
            Table::FromTeam => "teams AS from_team",
            Table::ToTeam => "teams AS to_team",
        }
    }

    /// Name used to qualify columns.
    pub fn alias(self) -> &'static str {
        match self {
            Table::Invoice => "invoices",
            Table::InvoiceSubmission => "invoice_payment_submission",
            Table::PaymentSubmission => "payment_submissions",
            Table::PaymentHistory => "payment_histories",
            Table::FromTeam => "from_team",
            Table::ToTeam => "to_team",
        }
    }

    pub fn neighbours(self) -> &'static [Table] {
        match self {
            Table::Invoice => &[
                Table::InvoiceSubmission,
                Table::PaymentHistory,
                Table::FromTeam,
                Table::ToTeam,
            ],
            Table::InvoiceSubmission => &[Table::Invoice, Table::PaymentSubmission],
            Table::PaymentSubmission => &[Table::InvoiceSubmission],
            Table::PaymentHistory => &[Table::Invoice],
            Table::FromTeam | Table::ToTeam => &[Table::Invoice],
        }
    }

    /// ON condition linking two adjacent tables.
    pub fn on_clause(a: Table, b: Table) -> Option<&'static str> {
        use Table::*;
        let clause = match (a, b) {
            (Invoice, InvoiceSubmission) | (InvoiceSubmission, Invoice) => {
                "invoice_payment_submission.invoice_id = invoices.id"
            }
            (InvoiceSubmission, PaymentSubmission) | (PaymentSubmission, InvoiceSubmission) => {
                "payment_submissions.id = invoice_payment_submission.payment_submission_id"
            }
            (Invoice, PaymentHistory) | (PaymentHistory, Invoice) => {
                "payment_histories.id = invoices.hist_id"
            }
            (Invoice, FromTeam) | (FromTeam, Invoice) => "from_team.id = invoices.from_team_id",
            (Invoice, ToTeam) | (ToTeam, Invoice) => "to_team.id = invoices.to_team_id",
            _ => return None,
        };
        Some(clause)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// Set of tables present in a query. The first requested kind for a table wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinSet {
    present: u8,
    left: u8,
}

impl JoinSet {
    pub fn contains(&self, table: Table) -> bool {
        self.present & table.bit() != 0
    }

    /// Returns `false` when the table was already present.
    pub fn insert(&mut self, table: Table, kind: JoinKind) -> bool {
        if self.contains(table) {
            return false;
        }
        self.present |= table.bit();
        if kind == JoinKind::Left {
            self.left |= table.bit();
        }
        true
    }

    pub fn kind(&self, table: Table) -> JoinKind {
        if self.left & table.bit() != 0 {
            JoinKind::Left
        } else {
            JoinKind::Inner
        }
    }

    pub fn len(&self) -> usize {
        self.present.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.present == 0
    }
}

/// Filter conditions. Each applies to exactly one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    InvoiceIds(Vec<i64>),
    FromTeam(i64),
    ToTeam(i64),
    FromTeamType(TeamType),
    ToTeamType(TeamType),
    Status(InvoiceStatus),
    StatusIn(Vec<InvoiceStatus>),
    StatusNotIn(Vec<InvoiceStatus>),
    Kind(InvoiceType),
    HasSubmission(bool),
    TxId(i64),
    OrderId(i64),
    SubmissionId(i64),
    CreatedBy(i64),
    VerifiedBy(i64),
    SubmissionState(SubmissionStatus),
    SubmissionCreatedFrom(DateTime<Utc>),
    SubmissionCreatedUntil(DateTime<Utc>),
    HistoryCreatedFrom(DateTime<Utc>),
    HistoryCreatedUntil(DateTime<Utc>),
}

impl Predicate {
    pub fn table(&self) -> Table {
        match self {
            Predicate::FromTeamType(_) => Table::FromTeam,
            Predicate::ToTeamType(_) => Table::ToTeam,
            Predicate::SubmissionId(_)
            | Predicate::CreatedBy(_)
            | Predicate::VerifiedBy(_)
            | Predicate::SubmissionState(_)
            | Predicate::SubmissionCreatedFrom(_)
            | Predicate::SubmissionCreatedUntil(_) => Table::PaymentSubmission,
            Predicate::HistoryCreatedFrom(_) | Predicate::HistoryCreatedUntil(_) => {
                Table::PaymentHistory
            }
            _ => Table::Invoice,
        }
    }
}

/// One step of the join plan: join `to` onto the already-present `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinStep {
    pub from: Table,
    pub to: Table,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    root: Table,
    tables: JoinSet,
    predicates: Vec<Predicate>,
    lock: bool,
}

impl QuerySpec {
    pub(crate) fn new(root: Table, lock: bool) -> Self {
        let mut tables = JoinSet::default();
        tables.insert(root, JoinKind::Inner);
        Self {
            root,
            tables,
            predicates: Vec::new(),
            lock,
        }
    }

    pub fn root(&self) -> Table {
        self.root
    }

    pub fn is_locked(&self) -> bool {
        self.lock
    }

    pub fn tables(&self) -> &JoinSet {
        &self.tables
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub(crate) fn join(&mut self, table: Table, kind: JoinKind) {
        self.tables.insert(table, kind);
    }

    pub(crate) fn filter(&mut self, predicate: Predicate) {
        let table = predicate.table();
        if !self.tables.contains(table) {
            self.tables.insert(table, JoinKind::Inner);
        }
        self.predicates.push(predicate);
    }

    /// Re-root the query, joining whatever tables on `path` are still missing.
    pub(crate) fn pivot(mut self, root: Table, path: &[Table], kind: JoinKind) -> Self {
        for table in path {
            self.join(*table, kind);
        }
        self.root = root;
        self
    }

    /// Breadth-first join order starting at the root, covering every present table.
    pub fn join_plan(&self) -> Vec<JoinStep> {
        let mut visited = JoinSet::default();
        visited.insert(self.root, JoinKind::Inner);
        let mut queue = VecDeque::from([self.root]);
        let mut plan = Vec::with_capacity(self.tables.len().saturating_sub(1));

        while let Some(current) = queue.pop_front() {
            for next in current.neighbours() {
                if self.tables.contains(*next) && visited.insert(*next, JoinKind::Inner) {
                    plan.push(JoinStep {
                        from: current,
                        to: *next,
                        kind: self.tables.kind(*next),
                    });
                    queue.push_back(*next);
                }
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_set_is_idempotent_and_keeps_first_kind() {
        let mut set = JoinSet::default();
        assert!(set.insert(Table::PaymentHistory, JoinKind::Left));
        assert!(!set.insert(Table::PaymentHistory, JoinKind::Inner));
        assert_eq!(set.kind(Table::PaymentHistory), JoinKind::Left);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_join_plan_walks_from_root() {
        let spec = QuerySpec::new(Table::PaymentSubmission, false).pivot(
            Table::PaymentHistory,
            &[Table::InvoiceSubmission, Table::Invoice, Table::PaymentHistory],
            JoinKind::Inner,
        );

        let plan: Vec<(Table, Table)> = spec.join_plan().iter().map(|s| (s.from, s.to)).collect();
        assert_eq!(
            plan,
            vec![
                (Table::PaymentHistory, Table::Invoice),
                (Table::Invoice, Table::InvoiceSubmission),
                (Table::InvoiceSubmission, Table::PaymentSubmission),
            ]
        );
    }

    #[test]
    fn test_filter_adds_owning_table() {
        let mut spec = QuerySpec::new(Table::Invoice, false);
        spec.filter(Predicate::FromTeamType(TeamType::Warehouse));
        assert!(spec.tables().contains(Table::FromTeam));
        assert_eq!(spec.join_plan().len(), 1);
    }

    #[test]
    fn test_on_clause_is_symmetric() {
        assert_eq!(
            Table::on_clause(Table::Invoice, Table::PaymentHistory),
            Table::on_clause(Table::PaymentHistory, Table::Invoice)
        );
        assert!(Table::on_clause(Table::PaymentSubmission, Table::Invoice).is_none());
    }
}
