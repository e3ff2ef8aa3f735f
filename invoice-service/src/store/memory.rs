//! In-memory ledger with transactional sessions and NOWAIT row locks.
//!
//! A [`MemorySession`] keeps its own writes private until `commit`. Every read
//! sees the latest committed rows overlaid with those writes, the way a
//! READ COMMITTED Postgres transaction does. Row locks are shared across
//! sessions and released on commit, rollback or drop. A commit that would
//! overwrite a row another session committed after this session read it fails.

use super::{LedgerStore, LimitStore, TeamDirectory};
use crate::models::{
    Invoice, InvoiceLimitConfiguration, InvoiceStatus, InvoiceSubmissionLink, LimitType,
    NewInvoice, NewPaymentHistory, NewPaymentSubmission, NewPaymentSubmissionLog, PaidUpdate,
    PaymentHistory, PaymentSubmission, PaymentSubmissionLog, SubmissionStatus, Team,
    TeamInvoiceStatus, TeamType,
};
use crate::query::{
    InvoiceQuery, JoinKind, JoinStep, PaymentHistoryQuery, PaymentSubmissionQuery, Predicate,
    QuerySpec, Table,
};
use crate::services::error::LedgerError;
use crate::services::metrics::LOCK_CONFLICTS_TOTAL;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
struct Tables {
    teams: BTreeMap<i64, Team>,
    invoices: BTreeMap<i64, Invoice>,
    submissions: BTreeMap<i64, PaymentSubmission>,
    links: Vec<InvoiceSubmissionLink>,
    logs: BTreeMap<i64, PaymentSubmissionLog>,
    histories: BTreeMap<i64, PaymentHistory>,
    limits: BTreeMap<i64, InvoiceLimitConfiguration>,
}

/// Mutable rows tracked for write conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Rel {
    Invoice,
    Submission,
    Limit,
}

type Versions = HashMap<(Rel, i64), u64>;

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    versions: Versions,
    clock: u64,
    next_id: i64,
    next_session: u64,
    locks: HashMap<(Table, i64), u64>,
}

impl Shared {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn release(&mut self, session: u64) {
        self.locks.retain(|_, owner| *owner != session);
    }
}

fn overlay<T: Clone>(
    committed: &BTreeMap<i64, T>,
    own: &BTreeMap<i64, T>,
    touched: &BTreeSet<i64>,
) -> BTreeMap<i64, T> {
    let mut merged = committed.clone();
    for id in touched {
        if let Some(row) = own.get(id) {
            merged.insert(*id, row.clone());
        }
    }
    merged
}

fn guard(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared ledger state. Cloning yields another handle to the same ledger.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session. Reads see committed rows; writes stay private until commit.
    pub fn begin(&self) -> MemorySession {
        let mut shared = guard(&self.shared);
        shared.next_session += 1;
        MemorySession {
            shared: Arc::clone(&self.shared),
            id: shared.next_session,
            view: shared.tables.clone(),
            base: shared.versions.clone(),
            changes: Changes::default(),
        }
    }

    pub fn add_team(&self, name: &str, team_type: TeamType) -> Team {
        let mut shared = guard(&self.shared);
        let id = shared.allocate_id();
        let team = Team {
            id,
            name: name.to_string(),
            team_code: format!("T{id:04}"),
            team_type,
            created_at: Utc::now(),
        };
        shared.tables.teams.insert(id, team.clone());
        team
    }

    pub fn invoice(&self, invoice_id: i64) -> Option<Invoice> {
        guard(&self.shared).tables.invoices.get(&invoice_id).cloned()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        guard(&self.shared).tables.invoices.values().cloned().collect()
    }

    pub fn submissions(&self) -> Vec<PaymentSubmission> {
        guard(&self.shared).tables.submissions.values().cloned().collect()
    }

    pub fn submission_logs(&self) -> Vec<PaymentSubmissionLog> {
        guard(&self.shared).tables.logs.values().cloned().collect()
    }

    pub fn histories(&self) -> Vec<PaymentHistory> {
        guard(&self.shared).tables.histories.values().cloned().collect()
    }

    pub fn links(&self) -> Vec<InvoiceSubmissionLink> {
        guard(&self.shared).tables.links.clone()
    }

    pub fn limits(&self) -> Vec<InvoiceLimitConfiguration> {
        guard(&self.shared).tables.limits.values().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct Changes {
    invoices: BTreeSet<i64>,
    submissions: BTreeSet<i64>,
    links: Vec<InvoiceSubmissionLink>,
    logs: BTreeSet<i64>,
    histories: BTreeSet<i64>,
    limits: BTreeSet<i64>,
    deleted_limits: BTreeSet<i64>,
}

impl Changes {
    fn written(&self) -> impl Iterator<Item = (Rel, i64)> + '_ {
        self.invoices
            .iter()
            .map(|id| (Rel::Invoice, *id))
            .chain(self.submissions.iter().map(|id| (Rel::Submission, *id)))
            .chain(self.limits.iter().map(|id| (Rel::Limit, *id)))
            .chain(self.deleted_limits.iter().map(|id| (Rel::Limit, *id)))
    }
}

/// One transaction against a [`MemoryLedger`]. Dropping it rolls back.
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Mutex<Shared>>,
    id: u64,
    view: Tables,
    /// Committed row versions as of the last read.
    base: Versions,
    changes: Changes,
}

impl MemorySession {
    pub fn commit(mut self) -> Result<(), LedgerError> {
        let changes = std::mem::take(&mut self.changes);
        let mut shared = guard(&self.shared);

        if let Some((rel, id)) = changes
            .written()
            .find(|key| shared.versions.get(key) != self.base.get(key))
        {
            warn!(session = self.id, ?rel, id, "Row changed by a concurrent session");
            return Err(LedgerError::Consistency(format!(
                "{:?} {} was modified by a concurrent transaction",
                rel, id
            )));
        }

        shared.clock += 1;
        let version = shared.clock;
        for key in changes.written() {
            shared.versions.insert(key, version);
        }

        let tables = &mut shared.tables;
        for id in changes.invoices {
            if let Some(row) = self.view.invoices.get(&id) {
                tables.invoices.insert(id, row.clone());
            }
        }
        for id in changes.submissions {
            if let Some(row) = self.view.submissions.get(&id) {
                tables.submissions.insert(id, row.clone());
            }
        }
        tables.links.extend(changes.links);
        for id in changes.logs {
            if let Some(row) = self.view.logs.get(&id) {
                tables.logs.insert(id, row.clone());
            }
        }
        for id in changes.histories {
            if let Some(row) = self.view.histories.get(&id) {
                tables.histories.insert(id, row.clone());
            }
        }
        for id in changes.limits {
            if let Some(row) = self.view.limits.get(&id) {
                tables.limits.insert(id, row.clone());
            }
        }
        for id in changes.deleted_limits {
            tables.limits.remove(&id);
        }

        drop(shared);

        debug!(session = self.id, "Memory session committed");
        Ok(())
    }

    pub fn rollback(self) {
        debug!(session = self.id, "Memory session rolled back");
    }

    fn allocate_id(&self) -> i64 {
        guard(&self.shared).allocate_id()
    }

    /// Evaluate the query against the view and return matching root ids.
    fn select_ids(&self, spec: &QuerySpec) -> Vec<i64> {
        let mut rows: Vec<Row<'_>> = match spec.root() {
            Table::Invoice => self
                .view
                .invoices
                .values()
                .map(|invoice| Row {
                    invoice: Some(invoice),
                    ..Row::default()
                })
                .collect(),
            Table::PaymentSubmission => self
                .view
                .submissions
                .values()
                .map(|submission| Row {
                    submission: Some(submission),
                    ..Row::default()
                })
                .collect(),
            Table::PaymentHistory => self
                .view
                .histories
                .values()
                .map(|history| Row {
                    history: Some(history),
                    ..Row::default()
                })
                .collect(),
            _ => Vec::new(),
        };

        for step in spec.join_plan() {
            rows = rows
                .into_iter()
                .flat_map(|row| expand(&self.view, row, step))
                .collect();
        }

        let ids: BTreeSet<i64> = rows
            .iter()
            .filter(|row| spec.predicates().iter().all(|p| matches(p, row)))
            .filter_map(|row| row.root_id(spec.root()))
            .collect();

        ids.into_iter().collect()
    }

    /// Replace the view with the committed state, keeping this session's writes.
    fn refresh(&mut self, shared: &Shared) {
        let committed = &shared.tables;
        let changes = &self.changes;

        self.view.teams = committed.teams.clone();
        self.view.invoices = overlay(&committed.invoices, &self.view.invoices, &changes.invoices);
        self.view.submissions = overlay(
            &committed.submissions,
            &self.view.submissions,
            &changes.submissions,
        );
        self.view.logs = overlay(&committed.logs, &self.view.logs, &changes.logs);
        self.view.histories =
            overlay(&committed.histories, &self.view.histories, &changes.histories);
        let mut limits = overlay(&committed.limits, &self.view.limits, &changes.limits);
        for id in &changes.deleted_limits {
            limits.remove(id);
        }
        self.view.limits = limits;
        self.view.links = committed
            .links
            .iter()
            .chain(&changes.links)
            .copied()
            .collect();

        // rows this session wrote keep the version they were read at
        let mut base = shared.versions.clone();
        for key in changes.written() {
            match self.base.get(&key) {
                Some(version) => base.insert(key, *version),
                None => base.remove(&key),
            };
        }
        self.base = base;
    }

    fn sync(&mut self) {
        let handle = Arc::clone(&self.shared);
        let shared = guard(&handle);
        self.refresh(&shared);
    }

    /// Take NOWAIT locks on every id, or none if any is held elsewhere.
    fn lock_rows(
        &self,
        shared: &mut Shared,
        operation: &'static str,
        table: Table,
        ids: &[i64],
    ) -> Result<(), LedgerError> {
        if let Some(id) = ids.iter().find(|id| {
            shared
                .locks
                .get(&(table, **id))
                .is_some_and(|owner| *owner != self.id)
        }) {
            LOCK_CONFLICTS_TOTAL.with_label_values(&[operation]).inc();
            warn!(session = self.id, operation, table = table.alias(), id, "Row lock not available");
            return Err(LedgerError::LockConflict(format!(
                "could not obtain lock on row {} in relation \"{}\"",
                id,
                table.alias()
            )));
        }

        for id in ids {
            shared.locks.insert((table, *id), self.id);
        }
        Ok(())
    }

    /// Run one statement: refresh, evaluate, then lock the matched roots when
    /// the query asks for it. All three happen under one guard.
    fn select<T: Clone>(
        &mut self,
        operation: &'static str,
        spec: &QuerySpec,
        rows: fn(&Tables) -> &BTreeMap<i64, T>,
    ) -> Result<Vec<T>, LedgerError> {
        let handle = Arc::clone(&self.shared);
        let mut shared = guard(&handle);
        self.refresh(&shared);

        let ids = self.select_ids(spec);
        if spec.is_locked() {
            self.lock_rows(&mut shared, operation, spec.root(), &ids)?;
        }
        drop(shared);

        let table = rows(&self.view);
        Ok(ids.iter().filter_map(|id| table.get(id).cloned()).collect())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        guard(&self.shared).release(self.id);
    }
}

/// One joined tuple while evaluating a query.
#[derive(Debug, Clone, Copy, Default)]
struct Row<'a> {
    invoice: Option<&'a Invoice>,
    link: Option<&'a InvoiceSubmissionLink>,
    submission: Option<&'a PaymentSubmission>,
    history: Option<&'a PaymentHistory>,
    from_team: Option<&'a Team>,
    to_team: Option<&'a Team>,
}

impl Row<'_> {
    fn root_id(&self, root: Table) -> Option<i64> {
        match root {
            Table::Invoice => self.invoice.map(|i| i.id),
            Table::PaymentSubmission => self.submission.map(|s| s.id),
            Table::PaymentHistory => self.history.map(|h| h.id),
            _ => None,
        }
    }
}

fn expand<'a>(tables: &'a Tables, row: Row<'a>, step: JoinStep) -> Vec<Row<'a>> {
    let joined: Vec<Row<'a>> = match (step.from, step.to) {
        (Table::Invoice, Table::InvoiceSubmission) => row
            .invoice
            .map(|invoice| {
                tables
                    .links
                    .iter()
                    .filter(|l| l.invoice_id == invoice.id)
                    .map(|l| Row { link: Some(l), ..row })
                    .collect()
            })
            .unwrap_or_default(),
        (Table::PaymentSubmission, Table::InvoiceSubmission) => row
            .submission
            .map(|submission| {
                tables
                    .links
                    .iter()
                    .filter(|l| l.payment_submission_id == submission.id)
                    .map(|l| Row { link: Some(l), ..row })
                    .collect()
            })
            .unwrap_or_default(),
        (Table::InvoiceSubmission, Table::Invoice) => row
            .link
            .and_then(|l| tables.invoices.get(&l.invoice_id))
            .map(|invoice| vec![Row { invoice: Some(invoice), ..row }])
            .unwrap_or_default(),
        (Table::InvoiceSubmission, Table::PaymentSubmission) => row
            .link
            .and_then(|l| tables.submissions.get(&l.payment_submission_id))
            .map(|s| vec![Row { submission: Some(s), ..row }])
            .unwrap_or_default(),
        (Table::Invoice, Table::PaymentHistory) => row
            .invoice
            .and_then(|invoice| invoice.hist_id)
            .and_then(|hist_id| tables.histories.get(&hist_id))
            .map(|h| vec![Row { history: Some(h), ..row }])
            .unwrap_or_default(),
        (Table::PaymentHistory, Table::Invoice) => row
            .history
            .map(|history| {
                tables
                    .invoices
                    .values()
                    .filter(|i| i.hist_id == Some(history.id))
                    .map(|i| Row { invoice: Some(i), ..row })
                    .collect()
            })
            .unwrap_or_default(),
        (Table::Invoice, Table::FromTeam) => row
            .invoice
            .and_then(|i| tables.teams.get(&i.from_team_id))
            .map(|t| vec![Row { from_team: Some(t), ..row }])
            .unwrap_or_default(),
        (Table::Invoice, Table::ToTeam) => row
            .invoice
            .and_then(|i| tables.teams.get(&i.to_team_id))
            .map(|t| vec![Row { to_team: Some(t), ..row }])
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    if joined.is_empty() && step.kind == JoinKind::Left {
        vec![row]
    } else {
        joined
    }
}

fn on_invoice(row: &Row<'_>, f: impl FnOnce(&Invoice) -> bool) -> bool {
    row.invoice.is_some_and(f)
}

fn on_submission(row: &Row<'_>, f: impl FnOnce(&PaymentSubmission) -> bool) -> bool {
    row.submission.is_some_and(f)
}

fn on_history(row: &Row<'_>, f: impl FnOnce(&PaymentHistory) -> bool) -> bool {
    row.history.is_some_and(f)
}

fn matches(predicate: &Predicate, row: &Row<'_>) -> bool {
    match predicate {
        Predicate::InvoiceIds(ids) => on_invoice(row, |i| ids.contains(&i.id)),
        Predicate::FromTeam(id) => on_invoice(row, |i| i.from_team_id == *id),
        Predicate::ToTeam(id) => on_invoice(row, |i| i.to_team_id == *id),
        Predicate::FromTeamType(t) => row.from_team.is_some_and(|team| team.team_type == *t),
        Predicate::ToTeamType(t) => row.to_team.is_some_and(|team| team.team_type == *t),
        Predicate::Status(status) => on_invoice(row, |i| i.status == *status),
        Predicate::StatusIn(statuses) => on_invoice(row, |i| statuses.contains(&i.status)),
        Predicate::StatusNotIn(statuses) => on_invoice(row, |i| !statuses.contains(&i.status)),
        Predicate::Kind(t) => on_invoice(row, |i| i.invoice_type == *t),
        Predicate::HasSubmission(true) => on_invoice(row, |i| i.has_submission),
        // NULL has_submission counts as "no submission"
        Predicate::HasSubmission(false) => row.invoice.map_or(true, |i| !i.has_submission),
        Predicate::TxId(id) => on_invoice(row, |i| i.tx_id == Some(*id)),
        Predicate::OrderId(id) => on_invoice(row, |i| i.order_id == Some(*id)),
        Predicate::SubmissionId(id) => on_submission(row, |s| s.id == *id),
        Predicate::CreatedBy(id) => on_submission(row, |s| s.created_by_id == *id),
        Predicate::VerifiedBy(id) => on_submission(row, |s| s.completed_by_id == Some(*id)),
        Predicate::SubmissionState(status) => on_submission(row, |s| s.status == *status),
        Predicate::SubmissionCreatedFrom(at) => on_submission(row, |s| s.created_at >= *at),
        Predicate::SubmissionCreatedUntil(at) => on_submission(row, |s| s.created_at <= *at),
        Predicate::HistoryCreatedFrom(at) => on_history(row, |h| h.created_at >= *at),
        Predicate::HistoryCreatedUntil(at) => on_history(row, |h| h.created_at <= *at),
    }
}

#[async_trait]
impl LedgerStore for MemorySession {
    async fn find_invoices(&mut self, query: &InvoiceQuery) -> Result<Vec<Invoice>, LedgerError> {
        let mut invoices = self.select("find_invoices", query.spec(), |t| &t.invoices)?;
        invoices.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(invoices)
    }

    async fn find_submissions(
        &mut self,
        query: &PaymentSubmissionQuery,
    ) -> Result<Vec<PaymentSubmission>, LedgerError> {
        self.select("find_submissions", query.spec(), |t| &t.submissions)
    }

    async fn find_histories(
        &mut self,
        query: &PaymentHistoryQuery,
    ) -> Result<Vec<PaymentHistory>, LedgerError> {
        self.select("find_histories", query.spec(), |t| &t.histories)
    }

    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Invoice, LedgerError> {
        let created = Invoice {
            id: self.allocate_id(),
            from_team_id: invoice.from_team_id,
            to_team_id: invoice.to_team_id,
            invoice_type: invoice.invoice_type,
            status: invoice.status,
            amount: invoice.amount,
            tx_id: invoice.tx_id,
            order_id: invoice.order_id,
            has_submission: false,
            need_adjustment: invoice.need_adjustment,
            hist_id: None,
            created: invoice.created,
            paid_at: None,
            accepted_at: None,
        };
        self.view.invoices.insert(created.id, created.clone());
        self.changes.invoices.insert(created.id);
        Ok(created)
    }

    async fn update_invoice_status(
        &mut self,
        invoice_id: i64,
        status: InvoiceStatus,
    ) -> Result<u64, LedgerError> {
        match self.view.invoices.get_mut(&invoice_id) {
            Some(invoice) => {
                invoice.status = status;
                self.changes.invoices.insert(invoice_id);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn set_has_submission(
        &mut self,
        invoice_ids: &[i64],
        has_submission: bool,
    ) -> Result<u64, LedgerError> {
        let mut updated = 0;
        for id in invoice_ids {
            if let Some(invoice) = self.view.invoices.get_mut(id) {
                invoice.has_submission = has_submission;
                self.changes.invoices.insert(*id);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn mark_invoices_paid(
        &mut self,
        invoice_ids: &[i64],
        update: &PaidUpdate,
    ) -> Result<u64, LedgerError> {
        let mut updated = 0;
        for id in invoice_ids {
            if let Some(invoice) = self.view.invoices.get_mut(id) {
                if invoice.status != InvoiceStatus::NotPaid {
                    continue;
                }
                invoice.status = InvoiceStatus::Paid;
                invoice.hist_id = Some(update.hist_id);
                invoice.paid_at = Some(update.paid_at);
                invoice.accepted_at = Some(update.accepted_at);
                self.changes.invoices.insert(*id);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_submission(
        &mut self,
        submission: &NewPaymentSubmission,
    ) -> Result<PaymentSubmission, LedgerError> {
        let created = PaymentSubmission {
            id: self.allocate_id(),
            created_by_id: submission.created_by_id,
            completed_by_id: None,
            status: SubmissionStatus::Submitted,
            amount: submission.amount,
            receipt: submission.receipt.clone(),
            created_at: submission.created_at,
        };
        self.view.submissions.insert(created.id, created.clone());
        self.changes.submissions.insert(created.id);
        Ok(created)
    }

    async fn link_invoices(
        &mut self,
        submission_id: i64,
        invoice_ids: &[i64],
    ) -> Result<(), LedgerError> {
        for invoice_id in invoice_ids {
            let link = InvoiceSubmissionLink {
                invoice_id: *invoice_id,
                payment_submission_id: submission_id,
            };
            self.view.links.push(link);
            self.changes.links.push(link);
        }
        Ok(())
    }

    async fn update_submission_status(
        &mut self,
        submission_id: i64,
        status: SubmissionStatus,
        completed_by_id: i64,
    ) -> Result<u64, LedgerError> {
        match self.view.submissions.get_mut(&submission_id) {
            Some(submission) => {
                submission.status = status;
                submission.completed_by_id = Some(completed_by_id);
                self.changes.submissions.insert(submission_id);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_submission_log(
        &mut self,
        log: &NewPaymentSubmissionLog,
    ) -> Result<PaymentSubmissionLog, LedgerError> {
        let created = PaymentSubmissionLog {
            id: self.allocate_id(),
            payment_submission_id: log.payment_submission_id,
            status: log.status,
            from_agent: log.from_agent,
            by_user_id: log.by_user_id,
            created_at: log.created_at,
        };
        self.view.logs.insert(created.id, created.clone());
        self.changes.logs.insert(created.id);
        Ok(created)
    }

    async fn insert_history(
        &mut self,
        history: &NewPaymentHistory,
    ) -> Result<PaymentHistory, LedgerError> {
        let created = PaymentHistory {
            id: self.allocate_id(),
            amount: history.amount,
            created_by_id: history.created_by_id,
            created_at: history.created_at,
        };
        self.view.histories.insert(created.id, created.clone());
        self.changes.histories.insert(created.id);
        Ok(created)
    }
}

#[async_trait]
impl TeamDirectory for MemorySession {
    async fn get_team(&mut self, team_id: i64) -> Result<Option<Team>, LedgerError> {
        self.sync();
        Ok(self.view.teams.get(&team_id).cloned())
    }

    async fn teams_by_ids(&mut self, team_ids: &[i64]) -> Result<Vec<Team>, LedgerError> {
        self.sync();
        Ok(self
            .view
            .teams
            .values()
            .filter(|t| team_ids.contains(&t.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LimitStore for MemorySession {
    async fn unpaid_amount(
        &mut self,
        from_team_id: i64,
        to_team_id: i64,
    ) -> Result<Decimal, LedgerError> {
        self.sync();
        Ok(self
            .view
            .invoices
            .values()
            .filter(|i| {
                i.from_team_id == from_team_id
                    && i.to_team_id == to_team_id
                    && i.status == InvoiceStatus::NotPaid
            })
            .map(|i| i.amount)
            .sum())
    }

    async fn applicable_limits(
        &mut self,
        team_id: i64,
        for_team_id: i64,
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError> {
        self.sync();
        Ok(self
            .view
            .limits
            .values()
            .filter(|c| {
                c.team_id == team_id
                    && (c.limit_type == LimitType::Default
                        || (c.limit_type == LimitType::Team && c.for_team_id == Some(for_team_id)))
            })
            .cloned()
            .collect())
    }

    async fn find_limit(
        &mut self,
        team_id: i64,
        limit_type: LimitType,
        for_team_id: Option<i64>,
    ) -> Result<Option<InvoiceLimitConfiguration>, LedgerError> {
        self.sync();
        Ok(self
            .view
            .limits
            .values()
            .find(|c| {
                c.team_id == team_id && c.limit_type == limit_type && c.for_team_id == for_team_id
            })
            .cloned())
    }

    async fn save_limit(
        &mut self,
        config: &InvoiceLimitConfiguration,
    ) -> Result<InvoiceLimitConfiguration, LedgerError> {
        let mut saved = config.clone();
        if saved.id == 0 {
            saved.id = self.allocate_id();
        } else if let Some(existing) = self.view.limits.get(&saved.id) {
            saved = InvoiceLimitConfiguration {
                threshold: config.threshold,
                ..existing.clone()
            };
        } else {
            return Err(LedgerError::NotFound(format!(
                "limit configuration {}",
                saved.id
            )));
        }
        self.view.limits.insert(saved.id, saved.clone());
        self.changes.limits.insert(saved.id);
        Ok(saved)
    }

    async fn delete_limits(
        &mut self,
        team_id: i64,
        for_team_id: Option<i64>,
    ) -> Result<u64, LedgerError> {
        let doomed: Vec<i64> = self
            .view
            .limits
            .values()
            .filter(|c| c.team_id == team_id && for_team_id.map_or(true, |f| c.for_team_id == Some(f)))
            .map(|c| c.id)
            .collect();

        for id in &doomed {
            self.view.limits.remove(id);
            self.changes.limits.remove(id);
            self.changes.deleted_limits.insert(*id);
        }
        Ok(doomed.len() as u64)
    }

    async fn list_limits(
        &mut self,
        team_id: i64,
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError> {
        self.sync();
        Ok(self
            .view
            .limits
            .values()
            .filter(|c| c.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn limits_for_counterpart(
        &mut self,
        for_team_id: i64,
        team_ids: &[i64],
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError> {
        self.sync();
        Ok(self
            .view
            .limits
            .values()
            .filter(|c| c.for_team_id == Some(for_team_id) && team_ids.contains(&c.team_id))
            .cloned()
            .collect())
    }

    async fn team_invoice_status(
        &mut self,
        from_team_id: i64,
        to_team_ids: &[i64],
    ) -> Result<Vec<TeamInvoiceStatus>, LedgerError> {
        self.sync();
        let mut grouped: BTreeMap<i64, TeamInvoiceStatus> = BTreeMap::new();
        for invoice in self.view.invoices.values().filter(|i| {
            i.from_team_id == from_team_id
                && to_team_ids.contains(&i.to_team_id)
                && i.status == InvoiceStatus::NotPaid
        }) {
            let status = grouped
                .entry(invoice.to_team_id)
                .or_insert_with(|| TeamInvoiceStatus::empty(invoice.to_team_id));
            status.total += invoice.amount;
            if invoice.has_submission {
                status.submission_amount += invoice.amount;
            } else {
                status.unpaid_amount += invoice.amount;
            }
        }
        Ok(grouped.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceType;
    use crate::query::SubmissionFilter;

    async fn seed(ledger: &MemoryLedger) -> (Team, Team, Vec<Invoice>) {
        let seller = ledger.add_team("seller", TeamType::Selling);
        let warehouse = ledger.add_team("warehouse", TeamType::Warehouse);

        let mut session = ledger.begin();
        let mut invoices = Vec::new();
        for amount in [100, 200] {
            let invoice = session
                .insert_invoice(&NewInvoice::new(
                    seller.id,
                    warehouse.id,
                    InvoiceType::Product,
                    Decimal::from(amount),
                ))
                .await
                .unwrap();
            invoices.push(invoice);
        }
        session.commit().unwrap();

        (seller, warehouse, invoices)
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let ledger = MemoryLedger::new();
        let (seller, warehouse, _) = seed(&ledger).await;

        let mut session = ledger.begin();
        session
            .insert_invoice(&NewInvoice::new(
                seller.id,
                warehouse.id,
                InvoiceType::ShipFee,
                Decimal::from(5),
            ))
            .await
            .unwrap();
        drop(session);

        assert_eq!(ledger.invoices().len(), 2);
    }

    #[tokio::test]
    async fn test_locked_rows_conflict_until_session_ends() {
        let ledger = MemoryLedger::new();
        let (seller, _, _) = seed(&ledger).await;
        let query = InvoiceQuery::new(true).from_team(seller.id);

        let mut first = ledger.begin();
        assert_eq!(first.find_invoices(&query).await.unwrap().len(), 2);

        let conflicts = LOCK_CONFLICTS_TOTAL.with_label_values(&["find_invoices"]);
        let before = conflicts.get();
        let mut second = ledger.begin();
        let err = second.find_invoices(&query).await.unwrap_err();
        assert!(matches!(err, LedgerError::LockConflict(_)));
        assert!(conflicts.get() - before >= 1.0);

        // unlocked reads are not blocked
        let unlocked = InvoiceQuery::new(false).from_team(seller.id);
        assert_eq!(second.find_invoices(&unlocked).await.unwrap().len(), 2);

        first.rollback();
        assert_eq!(second.find_invoices(&query).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reads_see_rows_committed_after_begin() {
        let ledger = MemoryLedger::new();
        let (seller, _, invoices) = seed(&ledger).await;
        let query = InvoiceQuery::new(true).from_team(seller.id);

        let mut writer = ledger.begin();
        let mut reader = ledger.begin();

        writer
            .update_invoice_status(invoices[0].id, InvoiceStatus::Cancel)
            .await
            .unwrap();
        writer.commit().unwrap();

        let found = reader.find_invoices(&query).await.unwrap();
        assert_eq!(found[0].status, InvoiceStatus::Cancel);

        // own writes win over the committed state
        reader
            .update_invoice_status(invoices[1].id, InvoiceStatus::Paid)
            .await
            .unwrap();
        let found = reader.find_invoices(&query).await.unwrap();
        assert_eq!(found[1].status, InvoiceStatus::Paid);
        reader.commit().unwrap();

        assert_eq!(ledger.invoice(invoices[1].id).unwrap().status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn test_team_type_and_submission_filters() {
        let ledger = MemoryLedger::new();
        let (_, warehouse, invoices) = seed(&ledger).await;

        let mut session = ledger.begin();
        session
            .set_has_submission(&[invoices[0].id], true)
            .await
            .unwrap();

        let found = session
            .find_invoices(
                &InvoiceQuery::new(false)
                    .to_team(warehouse.id)
                    .from_team_type(TeamType::Selling)
                    .has_submission(SubmissionFilter::No),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, invoices[1].id);

        let none = session
            .find_invoices(&InvoiceQuery::new(false).to_team_type(TeamType::Selling))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_left_join_keeps_unmatched_invoices() {
        let ledger = MemoryLedger::new();
        let (seller, _, _) = seed(&ledger).await;
        let mut session = ledger.begin();

        let inner = InvoiceQuery::new(false)
            .from_team(seller.id)
            .join_payment_histories(JoinKind::Inner)
            .join_invoice(JoinKind::Inner);
        assert!(session.find_invoices(&inner).await.unwrap().is_empty());

        let left = InvoiceQuery::new(false)
            .from_team(seller.id)
            .join_payment_histories(JoinKind::Left)
            .join_invoice(JoinKind::Inner);
        assert_eq!(session.find_invoices(&left).await.unwrap().len(), 2);
    }
}
