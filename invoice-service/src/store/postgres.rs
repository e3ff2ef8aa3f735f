//! Postgres store bound to a caller-owned connection or transaction.

use super::{LedgerStore, LimitStore, TeamDirectory};
use crate::models::{
    Invoice, InvoiceLimitConfiguration, InvoiceStatus, LimitType, NewInvoice, NewPaymentHistory,
    NewPaymentSubmission, NewPaymentSubmissionLog, PaidUpdate, PaymentHistory, PaymentSubmission,
    PaymentSubmissionLog, SubmissionStatus, Team, TeamInvoiceStatus,
};
use crate::query::{sql, InvoiceQuery, PaymentHistoryQuery, PaymentSubmissionQuery};
use crate::services::error::LedgerError;
use crate::services::metrics::{DB_QUERY_DURATION, LOCK_CONFLICTS_TOTAL};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgConnection;
use tracing::{debug, instrument, warn};

/// Runs every statement on one connection, usually `&mut *tx` of an open
/// transaction. Commit and rollback stay with the owner of the transaction.
pub struct PgStore<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgStore<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> LedgerError {
    move |e| {
        let err = LedgerError::from(e);
        if let LedgerError::LockConflict(ref msg) = err {
            LOCK_CONFLICTS_TOTAL.with_label_values(&[operation]).inc();
            warn!(operation, error = %msg, "Row lock not available");
        }
        err
    }
}

#[async_trait]
impl LedgerStore for PgStore<'_> {
    #[instrument(skip(self, query), fields(locked = query.spec().is_locked()))]
    async fn find_invoices(&mut self, query: &InvoiceQuery) -> Result<Vec<Invoice>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoices"])
            .start_timer();

        let mut qb = sql::select(query.spec());
        let invoices = qb
            .build_query_as::<Invoice>()
            .fetch_all(&mut *self.conn)
            .await
            .map_err(db_error("find_invoices"))?;

        timer.observe_duration();
        debug!(count = invoices.len(), "Invoices loaded");

        Ok(invoices)
    }

    #[instrument(skip(self, query), fields(locked = query.spec().is_locked()))]
    async fn find_submissions(
        &mut self,
        query: &PaymentSubmissionQuery,
    ) -> Result<Vec<PaymentSubmission>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_submissions"])
            .start_timer();

        let mut qb = sql::select(query.spec());
        let submissions = qb
            .build_query_as::<PaymentSubmission>()
            .fetch_all(&mut *self.conn)
            .await
            .map_err(db_error("find_submissions"))?;

        timer.observe_duration();

        Ok(submissions)
    }

    #[instrument(skip(self, query), fields(locked = query.spec().is_locked()))]
    async fn find_histories(
        &mut self,
        query: &PaymentHistoryQuery,
    ) -> Result<Vec<PaymentHistory>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_histories"])
            .start_timer();

        let mut qb = sql::select(query.spec());
        let histories = qb
            .build_query_as::<PaymentHistory>()
            .fetch_all(&mut *self.conn)
            .await
            .map_err(db_error("find_histories"))?;

        timer.observe_duration();

        Ok(histories)
    }

    #[instrument(skip(self, invoice), fields(from = invoice.from_team_id, to = invoice.to_team_id))]
    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Invoice, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let created = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (from_team_id, to_team_id, type, status, amount, tx_id, order_id, need_adjustment, created)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(invoice.from_team_id)
        .bind(invoice.to_team_id)
        .bind(invoice.invoice_type.as_str())
        .bind(invoice.status.as_str())
        .bind(invoice.amount)
        .bind(invoice.tx_id)
        .bind(invoice.order_id)
        .bind(invoice.need_adjustment)
        .bind(invoice.created)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(db_error("insert_invoice"))?;

        timer.observe_duration();

        Ok(created)
    }

    #[instrument(skip(self))]
    async fn update_invoice_status(
        &mut self,
        invoice_id: i64,
        status: InvoiceStatus,
    ) -> Result<u64, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_status"])
            .start_timer();

        let result = sqlx::query("UPDATE invoices SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(invoice_id)
            .execute(&mut *self.conn)
            .await
            .map_err(db_error("update_invoice_status"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, invoice_ids), fields(count = invoice_ids.len()))]
    async fn set_has_submission(
        &mut self,
        invoice_ids: &[i64],
        has_submission: bool,
    ) -> Result<u64, LedgerError> {
        if invoice_ids.is_empty() {
            return Ok(0);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_has_submission"])
            .start_timer();

        let result = sqlx::query("UPDATE invoices SET has_submission = $1 WHERE id = ANY($2)")
            .bind(has_submission)
            .bind(invoice_ids)
            .execute(&mut *self.conn)
            .await
            .map_err(db_error("set_has_submission"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, invoice_ids, update), fields(count = invoice_ids.len(), hist_id = update.hist_id))]
    async fn mark_invoices_paid(
        &mut self,
        invoice_ids: &[i64],
        update: &PaidUpdate,
    ) -> Result<u64, LedgerError> {
        if invoice_ids.is_empty() {
            return Ok(0);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoices_paid"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $1, hist_id = $2, paid_at = $3, accepted_at = $4
            WHERE id = ANY($5) AND status = $6
            "#,
        )
        .bind(InvoiceStatus::Paid.as_str())
        .bind(update.hist_id)
        .bind(update.paid_at)
        .bind(update.accepted_at)
        .bind(invoice_ids)
        .bind(InvoiceStatus::NotPaid.as_str())
        .execute(&mut *self.conn)
        .await
        .map_err(db_error("mark_invoices_paid"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, submission), fields(amount = %submission.amount))]
    async fn insert_submission(
        &mut self,
        submission: &NewPaymentSubmission,
    ) -> Result<PaymentSubmission, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_submission"])
            .start_timer();

        let created = sqlx::query_as::<_, PaymentSubmission>(
            r#"
            INSERT INTO payment_submissions (created_by_id, status, amount, receipt, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(submission.created_by_id)
        .bind(SubmissionStatus::Submitted.as_str())
        .bind(submission.amount)
        .bind(&submission.receipt)
        .bind(submission.created_at)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(db_error("insert_submission"))?;

        timer.observe_duration();

        Ok(created)
    }

    #[instrument(skip(self, invoice_ids), fields(count = invoice_ids.len()))]
    async fn link_invoices(
        &mut self,
        submission_id: i64,
        invoice_ids: &[i64],
    ) -> Result<(), LedgerError> {
        if invoice_ids.is_empty() {
            return Ok(());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["link_invoices"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO invoice_payment_submission (invoice_id, payment_submission_id)
            SELECT UNNEST($1::BIGINT[]), $2
            "#,
        )
        .bind(invoice_ids)
        .bind(submission_id)
        .execute(&mut *self.conn)
        .await
        .map_err(db_error("link_invoices"))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_submission_status(
        &mut self,
        submission_id: i64,
        status: SubmissionStatus,
        completed_by_id: i64,
    ) -> Result<u64, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_submission_status"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE payment_submissions SET status = $1, completed_by_id = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(completed_by_id)
        .bind(submission_id)
        .execute(&mut *self.conn)
        .await
        .map_err(db_error("update_submission_status"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, log), fields(submission_id = log.payment_submission_id))]
    async fn insert_submission_log(
        &mut self,
        log: &NewPaymentSubmissionLog,
    ) -> Result<PaymentSubmissionLog, LedgerError> {
        let created = sqlx::query_as::<_, PaymentSubmissionLog>(
            r#"
            INSERT INTO payment_submission_logs (payment_submission_id, status, from_agent, by_user_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(log.payment_submission_id)
        .bind(log.status.as_str())
        .bind(log.from_agent.as_str())
        .bind(log.by_user_id)
        .bind(log.created_at)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(db_error("insert_submission_log"))?;

        Ok(created)
    }

    #[instrument(skip(self, history), fields(amount = %history.amount))]
    async fn insert_history(
        &mut self,
        history: &NewPaymentHistory,
    ) -> Result<PaymentHistory, LedgerError> {
        let created = sqlx::query_as::<_, PaymentHistory>(
            r#"
            INSERT INTO payment_histories (amount, created_by_id, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, amount, created_by_id, created_at
            "#,
        )
        .bind(history.amount)
        .bind(history.created_by_id)
        .bind(history.created_at)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(db_error("insert_history"))?;

        Ok(created)
    }
}

#[async_trait]
impl TeamDirectory for PgStore<'_> {
    #[instrument(skip(self))]
    async fn get_team(&mut self, team_id: i64) -> Result<Option<Team>, LedgerError> {
        let team = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = $1")
            .bind(team_id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(db_error("get_team"))?;

        Ok(team)
    }

    #[instrument(skip(self, team_ids), fields(count = team_ids.len()))]
    async fn teams_by_ids(&mut self, team_ids: &[i64]) -> Result<Vec<Team>, LedgerError> {
        if team_ids.is_empty() {
            return Ok(Vec::new());
        }

        let teams = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = ANY($1) ORDER BY id")
            .bind(team_ids)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(db_error("teams_by_ids"))?;

        Ok(teams)
    }
}

#[async_trait]
impl LimitStore for PgStore<'_> {
    #[instrument(skip(self))]
    async fn unpaid_amount(
        &mut self,
        from_team_id: i64,
        to_team_id: i64,
    ) -> Result<Decimal, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unpaid_amount"])
            .start_timer();

        let amount = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM invoices
            WHERE from_team_id = $1 AND to_team_id = $2 AND status = $3
            "#,
        )
        .bind(from_team_id)
        .bind(to_team_id)
        .bind(InvoiceStatus::NotPaid.as_str())
        .fetch_one(&mut *self.conn)
        .await
        .map_err(db_error("unpaid_amount"))?;

        timer.observe_duration();

        Ok(amount)
    }

    #[instrument(skip(self))]
    async fn applicable_limits(
        &mut self,
        team_id: i64,
        for_team_id: i64,
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError> {
        let configs = sqlx::query_as::<_, InvoiceLimitConfiguration>(
            r#"
            SELECT * FROM invoice_limit_configurations
            WHERE team_id = $1
              AND (limit_type = $2 OR (limit_type = $3 AND for_team_id = $4))
            ORDER BY id
            "#,
        )
        .bind(team_id)
        .bind(LimitType::Default.as_str())
        .bind(LimitType::Team.as_str())
        .bind(for_team_id)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(db_error("applicable_limits"))?;

        Ok(configs)
    }

    #[instrument(skip(self))]
    async fn find_limit(
        &mut self,
        team_id: i64,
        limit_type: LimitType,
        for_team_id: Option<i64>,
    ) -> Result<Option<InvoiceLimitConfiguration>, LedgerError> {
        let config = sqlx::query_as::<_, InvoiceLimitConfiguration>(
            r#"
            SELECT * FROM invoice_limit_configurations
            WHERE team_id = $1 AND limit_type = $2 AND for_team_id IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(team_id)
        .bind(limit_type.as_str())
        .bind(for_team_id)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(db_error("find_limit"))?;

        Ok(config)
    }

    #[instrument(skip(self, config), fields(team_id = config.team_id, limit_type = %config.limit_type))]
    async fn save_limit(
        &mut self,
        config: &InvoiceLimitConfiguration,
    ) -> Result<InvoiceLimitConfiguration, LedgerError> {
        let saved = if config.id == 0 {
            sqlx::query_as::<_, InvoiceLimitConfiguration>(
                r#"
                INSERT INTO invoice_limit_configurations (team_id, limit_type, for_team_id, threshold)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(config.team_id)
            .bind(config.limit_type.as_str())
            .bind(config.for_team_id)
            .bind(config.threshold)
            .fetch_one(&mut *self.conn)
            .await
        } else {
            sqlx::query_as::<_, InvoiceLimitConfiguration>(
                r#"
                UPDATE invoice_limit_configurations SET threshold = $1
                WHERE id = $2
                RETURNING *
                "#,
            )
            .bind(config.threshold)
            .bind(config.id)
            .fetch_one(&mut *self.conn)
            .await
        }
        .map_err(db_error("save_limit"))?;

        Ok(saved)
    }

    #[instrument(skip(self))]
    async fn delete_limits(
        &mut self,
        team_id: i64,
        for_team_id: Option<i64>,
    ) -> Result<u64, LedgerError> {
        let result = match for_team_id {
            Some(for_team_id) => {
                sqlx::query(
                    "DELETE FROM invoice_limit_configurations WHERE team_id = $1 AND for_team_id = $2",
                )
                .bind(team_id)
                .bind(for_team_id)
                .execute(&mut *self.conn)
                .await
            }
            None => {
                sqlx::query("DELETE FROM invoice_limit_configurations WHERE team_id = $1")
                    .bind(team_id)
                    .execute(&mut *self.conn)
                    .await
            }
        }
        .map_err(db_error("delete_limits"))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn list_limits(
        &mut self,
        team_id: i64,
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError> {
        let configs = sqlx::query_as::<_, InvoiceLimitConfiguration>(
            "SELECT * FROM invoice_limit_configurations WHERE team_id = $1 ORDER BY id",
        )
        .bind(team_id)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(db_error("list_limits"))?;

        Ok(configs)
    }

    #[instrument(skip(self, team_ids), fields(count = team_ids.len()))]
    async fn limits_for_counterpart(
        &mut self,
        for_team_id: i64,
        team_ids: &[i64],
    ) -> Result<Vec<InvoiceLimitConfiguration>, LedgerError> {
        let configs = sqlx::query_as::<_, InvoiceLimitConfiguration>(
            r#"
            SELECT * FROM invoice_limit_configurations
            WHERE for_team_id = $1 AND team_id = ANY($2)
            ORDER BY id
            "#,
        )
        .bind(for_team_id)
        .bind(team_ids)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(db_error("limits_for_counterpart"))?;

        Ok(configs)
    }

    #[instrument(skip(self, to_team_ids), fields(count = to_team_ids.len()))]
    async fn team_invoice_status(
        &mut self,
        from_team_id: i64,
        to_team_ids: &[i64],
    ) -> Result<Vec<TeamInvoiceStatus>, LedgerError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["team_invoice_status"])
            .start_timer();

        let statuses = sqlx::query_as::<_, TeamInvoiceStatus>(
            r#"
            SELECT
                to_team_id,
                COALESCE(SUM(amount), 0) AS total,
                COALESCE(SUM(amount) FILTER (WHERE has_submission IS NOT TRUE), 0) AS unpaid_amount,
                COALESCE(SUM(amount) FILTER (WHERE has_submission = TRUE), 0) AS submission_amount
            FROM invoices
            WHERE from_team_id = $1 AND to_team_id = ANY($2) AND status = $3
            GROUP BY to_team_id
            ORDER BY to_team_id
            "#,
        )
        .bind(from_team_id)
        .bind(to_team_ids)
        .bind(InvoiceStatus::NotPaid.as_str())
        .fetch_all(&mut *self.conn)
        .await
        .map_err(db_error("team_invoice_status"))?;

        timer.observe_duration();

        Ok(statuses)
    }
}
