//! Common test utilities for invoice-service integration tests.

#![allow(dead_code)]

use invoice_service::models::{Invoice, InvoiceStatus, InvoiceType, NewInvoice, Team, TeamType};
use invoice_service::store::{LedgerStore, MemoryLedger};
use rust_decimal::Decimal;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,invoice_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A fresh ledger with a selling team owing a warehouse team.
pub fn ledger_with_teams() -> (MemoryLedger, Team, Team) {
    init_tracing();
    let ledger = MemoryLedger::new();
    let seller = ledger.add_team("seller", TeamType::Selling);
    let warehouse = ledger.add_team("warehouse", TeamType::Warehouse);
    (ledger, seller, warehouse)
}

pub fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

/// Commit one invoice built by `build` and return it.
pub async fn seed(ledger: &MemoryLedger, invoice: NewInvoice) -> Invoice {
    let mut session = ledger.begin();
    let created = session
        .insert_invoice(&invoice)
        .await
        .expect("Failed to seed invoice");
    session.commit().unwrap();
    created
}

pub async fn seed_order_invoice(
    ledger: &MemoryLedger,
    from: &Team,
    to: &Team,
    status: InvoiceStatus,
    amount: i64,
    order_id: i64,
) -> Invoice {
    seed(
        ledger,
        NewInvoice::new(from.id, to.id, InvoiceType::ShipFee, dec(amount))
            .with_status(status)
            .with_order_id(Some(order_id)),
    )
    .await
}

pub async fn seed_unpaid(
    ledger: &MemoryLedger,
    from: &Team,
    to: &Team,
    invoice_type: InvoiceType,
    amount: i64,
) -> Invoice {
    seed(
        ledger,
        NewInvoice::new(from.id, to.id, invoice_type, dec(amount)),
    )
    .await
}
