//! Services module for invoice-service.

pub mod adjustment;
pub mod cache;
pub mod database;
pub mod error;
pub mod invoice_manage;
pub mod limit_invoice;
pub mod metrics;
pub mod payment_submission;

pub use adjustment::{adjustment_for, create_adjustments};
pub use cache::{Cache, CacheError, LocalCache, RedisCache};
pub use database::Database;
pub use error::LedgerError;
pub use invoice_manage::{InvoiceManage, ReadjustAmount, ReadjustOutcome};
pub use limit_invoice::{evaluate_limit, limit_invoice_cache_key, LimitInvoiceService};
pub use metrics::{get_metrics, init_metrics, record_error, record_submission_transitions};
pub use payment_submission::{select_invoices, AcceptOutcome, PaymentSubmissionMutation};
