//! Composable, lock-aware queries over invoices, submissions and histories.
//!
//! Every filter is a no-op for a zero or empty argument so callers can chain
//! unconditionally. Joins are tracked per query and applied at most once.
//! `join_*` methods that return a different query type pivot the selected
//! entity while keeping every join and filter already applied.

mod invoice;
mod payment_history;
mod payment_submission;
pub mod spec;
pub mod sql;

pub use invoice::{InvoiceQuery, SubmissionFilter};
pub use payment_history::PaymentHistoryQuery;
pub use payment_submission::PaymentSubmissionQuery;
pub use spec::{JoinKind, JoinSet, JoinStep, Predicate, QuerySpec, Table};
