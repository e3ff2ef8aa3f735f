//! Compensating invoices created when a submission is accepted.

use crate::models::{Invoice, InvoiceStatus, NewInvoice};
use crate::services::error::LedgerError;
use crate::services::metrics::INVOICES_CREATED_TOTAL;
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

/// The reversal of `invoice`, or `None` for adjustment-class invoices.
pub fn adjustment_for(invoice: &Invoice, now: DateTime<Utc>) -> Option<NewInvoice> {
    if invoice.invoice_type.is_adjustment() {
        return None;
    }

    Some(
        NewInvoice::new(
            invoice.to_team_id,
            invoice.from_team_id,
            invoice.invoice_type.adjustment_type(),
            invoice.amount,
        )
        .with_status(InvoiceStatus::NotPaid)
        .with_order_id(invoice.order_id)
        .with_created(now),
    )
}

/// Persist one reversed invoice per eligible source invoice.
#[instrument(skip(store, invoices), fields(count = invoices.len()))]
pub async fn create_adjustments<S: LedgerStore>(
    store: &mut S,
    invoices: &[Invoice],
) -> Result<Vec<Invoice>, LedgerError> {
    let now = Utc::now();
    let mut created = Vec::with_capacity(invoices.len());

    for source in invoices {
        let Some(adjustment) = adjustment_for(source, now) else {
            continue;
        };

        let invoice = store.insert_invoice(&adjustment).await?;
        INVOICES_CREATED_TOTAL
            .with_label_values(&[invoice.invoice_type.as_str()])
            .inc();
        info!(
            source_id = source.id,
            adjustment_id = invoice.id,
            adjustment_type = %invoice.invoice_type,
            "Adjustment invoice created"
        );
        created.push(invoice);
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceType;
    use rust_decimal::Decimal;

    fn invoice(invoice_type: InvoiceType) -> Invoice {
        Invoice {
            id: 10,
            from_team_id: 1,
            to_team_id: 2,
            invoice_type,
            status: InvoiceStatus::NotPaid,
            amount: Decimal::new(1250, 2),
            tx_id: Some(7),
            order_id: Some(99),
            has_submission: true,
            need_adjustment: true,
            hist_id: None,
            created: Utc::now(),
            paid_at: None,
            accepted_at: None,
        }
    }

    #[test]
    fn test_adjustment_reverses_direction_and_maps_type() {
        let now = Utc::now();
        let adjustment = adjustment_for(&invoice(InvoiceType::Product), now).unwrap();

        assert_eq!(adjustment.from_team_id, 2);
        assert_eq!(adjustment.to_team_id, 1);
        assert_eq!(adjustment.invoice_type, InvoiceType::ProductAdjustment);
        assert_eq!(adjustment.status, InvoiceStatus::NotPaid);
        assert_eq!(adjustment.amount, Decimal::new(1250, 2));
        assert_eq!(adjustment.order_id, Some(99));
        assert_eq!(adjustment.tx_id, None);
        assert!(!adjustment.need_adjustment);
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(
            InvoiceType::WarehouseFee.adjustment_type(),
            InvoiceType::WarehouseAdjustment
        );
        assert_eq!(
            InvoiceType::ShipFee.adjustment_type(),
            InvoiceType::CommonAdjustment
        );
    }

    #[test]
    fn test_adjustments_are_never_adjusted() {
        let now = Utc::now();
        for t in [
            InvoiceType::WarehouseAdjustment,
            InvoiceType::ProductAdjustment,
            InvoiceType::CommonAdjustment,
        ] {
            assert!(adjustment_for(&invoice(t), now).is_none());
        }
    }
}
