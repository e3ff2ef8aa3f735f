//! Readjustment of a team pair's outstanding balance.

use crate::models::{Invoice, InvoiceStatus, InvoiceType, NewInvoice};
use crate::query::InvoiceQuery;
use crate::services::error::LedgerError;
use crate::services::metrics::INVOICES_CREATED_TOTAL;
use crate::store::LedgerStore;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Target balance for `from_team_id` → `to_team_id` under one correlation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadjustAmount {
    pub from_team_id: i64,
    pub to_team_id: i64,
    pub amount: Decimal,
    pub tx_id: Option<i64>,
    pub order_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadjustOutcome {
    pub cancelled: Vec<i64>,
    /// Amount already settled and subtracted from the target.
    pub paid_amount: Decimal,
    pub created: Option<Invoice>,
}

/// Mutations over a working set of invoices loaded under lock.
pub struct InvoiceManage<'s, S: LedgerStore> {
    store: &'s mut S,
    invoices: Vec<Invoice>,
}

impl<'s, S: LedgerStore> InvoiceManage<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            invoices: Vec::new(),
        }
    }

    pub fn with_invoices(store: &'s mut S, invoices: Vec<Invoice>) -> Self {
        Self { store, invoices }
    }

    /// Replace the working set with the query result.
    pub async fn load(&mut self, query: &InvoiceQuery) -> Result<&[Invoice], LedgerError> {
        self.invoices = self.store.find_invoices(query).await?;
        Ok(&self.invoices)
    }

    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    /// Cancel open invoices and leave one `not_paid` invoice for the part of
    /// the target not already paid.
    #[instrument(
        skip(self, payload),
        fields(
            from = payload.from_team_id,
            to = payload.to_team_id,
            amount = %payload.amount,
            invoice_count = self.invoices.len()
        )
    )]
    pub async fn readjust_amount(
        &mut self,
        payload: &ReadjustAmount,
    ) -> Result<ReadjustOutcome, LedgerError> {
        let tx_id = payload.tx_id.filter(|id| *id != 0);
        let order_id = payload.order_id.filter(|id| *id != 0);
        if tx_id.is_none() && order_id.is_none() {
            return Err(LedgerError::Validation(
                "readjustment requires a tx_id or order_id".to_string(),
            ));
        }

        let mut outcome = ReadjustOutcome::default();
        let mut residual = payload.amount;

        for invoice in self.invoices.iter_mut() {
            if invoice.from_team_id != payload.from_team_id {
                return Err(LedgerError::Consistency(format!(
                    "invoice {} from team {} does not match {}",
                    invoice.id, invoice.from_team_id, payload.from_team_id
                )));
            }
            if invoice.to_team_id != payload.to_team_id {
                return Err(LedgerError::Consistency(format!(
                    "invoice {} to team {} does not match {}",
                    invoice.id, invoice.to_team_id, payload.to_team_id
                )));
            }

            match invoice.status {
                InvoiceStatus::Paid => {
                    residual -= invoice.amount;
                    outcome.paid_amount += invoice.amount;
                }
                InvoiceStatus::NotFinal | InvoiceStatus::NotPaid => {
                    self.store
                        .update_invoice_status(invoice.id, InvoiceStatus::Cancel)
                        .await?;
                    invoice.status = InvoiceStatus::Cancel;
                    outcome.cancelled.push(invoice.id);
                }
                InvoiceStatus::Cancel => {}
            }
        }

        if residual.is_zero() {
            info!(cancelled = outcome.cancelled.len(), "Balance already converged");
            return Ok(outcome);
        }

        if self.invoices.is_empty() {
            warn!("Creating readjustment invoice without any existing invoices");
        }

        let (from, to) = if residual.is_sign_positive() {
            (payload.from_team_id, payload.to_team_id)
        } else {
            (payload.to_team_id, payload.from_team_id)
        };

        let invoice = self
            .store
            .insert_invoice(
                &NewInvoice::new(from, to, InvoiceType::ShipFee, residual.abs())
                    .with_status(InvoiceStatus::NotPaid)
                    .with_tx_id(tx_id)
                    .with_order_id(order_id)
                    .with_created(Utc::now()),
            )
            .await?;

        INVOICES_CREATED_TOTAL
            .with_label_values(&[invoice.invoice_type.as_str()])
            .inc();
        info!(
            invoice_id = invoice.id,
            amount = %invoice.amount,
            cancelled = outcome.cancelled.len(),
            "Readjustment invoice created"
        );

        self.invoices.push(invoice.clone());
        outcome.created = Some(invoice);

        Ok(outcome)
    }
}
