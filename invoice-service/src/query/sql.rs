//! Render a [`QuerySpec`] to Postgres SQL.
//!
//! Shape:
//!
//! ```text
//! SELECT root.* FROM root
//! WHERE root.id IN (SELECT root.id FROM root <joins> WHERE <predicates>)
//! ORDER BY ... [FOR UPDATE NOWAIT]
//! ```
//!
//! Joins and filters live in the subquery, so fan-out never duplicates root
//! rows and the row lock covers only the root table.

use super::spec::{Predicate, QuerySpec, Table};
use crate::models::InvoiceStatus;
use sqlx::{Postgres, QueryBuilder};

pub fn select(spec: &QuerySpec) -> QueryBuilder<'static, Postgres> {
    let root = spec.root();
    let alias = root.alias();

    let mut qb = QueryBuilder::new(format!(
        "SELECT {alias}.* FROM {} WHERE {alias}.id IN (SELECT {alias}.id FROM {}",
        root.source(),
        root.source()
    ));

    for step in spec.join_plan() {
        let on = Table::on_clause(step.from, step.to).unwrap_or("TRUE");
        qb.push(format!(" {} {} ON {}", step.kind.as_sql(), step.to.source(), on));
    }

    qb.push(" WHERE TRUE");
    for predicate in spec.predicates() {
        qb.push(" AND ");
        push_predicate(&mut qb, predicate);
    }
    qb.push(")");

    match root {
        Table::Invoice => qb.push(" ORDER BY invoices.created ASC, invoices.id ASC"),
        _ => qb.push(format!(" ORDER BY {alias}.id ASC")),
    };

    if spec.is_locked() {
        qb.push(" FOR UPDATE NOWAIT");
    }

    qb
}

fn status_names(statuses: &[InvoiceStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn push_predicate(qb: &mut QueryBuilder<'static, Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::InvoiceIds(ids) => {
            qb.push("invoices.id = ANY(").push_bind(ids.clone()).push(")");
        }
        Predicate::FromTeam(id) => {
            qb.push("invoices.from_team_id = ").push_bind(*id);
        }
        Predicate::ToTeam(id) => {
            qb.push("invoices.to_team_id = ").push_bind(*id);
        }
        Predicate::FromTeamType(t) => {
            qb.push("from_team.type = ").push_bind(t.as_str().to_string());
        }
        Predicate::ToTeamType(t) => {
            qb.push("to_team.type = ").push_bind(t.as_str().to_string());
        }
        Predicate::Status(status) => {
            qb.push("invoices.status = ").push_bind(status.as_str().to_string());
        }
        Predicate::StatusIn(statuses) => {
            qb.push("invoices.status = ANY(")
                .push_bind(status_names(statuses))
                .push(")");
        }
        Predicate::StatusNotIn(statuses) => {
            qb.push("NOT (invoices.status = ANY(")
                .push_bind(status_names(statuses))
                .push("))");
        }
        Predicate::Kind(t) => {
            qb.push("invoices.type = ").push_bind(t.as_str().to_string());
        }
        Predicate::HasSubmission(true) => {
            qb.push("invoices.has_submission = TRUE");
        }
        Predicate::HasSubmission(false) => {
            qb.push("(invoices.has_submission = FALSE OR invoices.has_submission IS NULL)");
        }
        Predicate::TxId(id) => {
            qb.push("invoices.tx_id = ").push_bind(*id);
        }
        Predicate::OrderId(id) => {
            qb.push("invoices.order_id = ").push_bind(*id);
        }
        Predicate::SubmissionId(id) => {
            qb.push("payment_submissions.id = ").push_bind(*id);
        }
        Predicate::CreatedBy(id) => {
            qb.push("payment_submissions.created_by_id = ").push_bind(*id);
        }
        Predicate::VerifiedBy(id) => {
            qb.push("payment_submissions.completed_by_id = ").push_bind(*id);
        }
        Predicate::SubmissionState(status) => {
            qb.push("payment_submissions.status = ")
                .push_bind(status.as_str().to_string());
        }
        Predicate::SubmissionCreatedFrom(at) => {
            qb.push("payment_submissions.created_at >= ").push_bind(*at);
        }
        Predicate::SubmissionCreatedUntil(at) => {
            qb.push("payment_submissions.created_at <= ").push_bind(*at);
        }
        Predicate::HistoryCreatedFrom(at) => {
            qb.push("payment_histories.created_at >= ").push_bind(*at);
        }
        Predicate::HistoryCreatedUntil(at) => {
            qb.push("payment_histories.created_at <= ").push_bind(*at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionStatus;
    use crate::query::{InvoiceQuery, JoinKind, PaymentSubmissionQuery};

    #[test]
    fn test_plain_invoice_query() {
        let sql = select(InvoiceQuery::new(false).spec()).sql().to_string();
        assert_eq!(
            sql,
            "SELECT invoices.* FROM invoices WHERE invoices.id IN \
             (SELECT invoices.id FROM invoices WHERE TRUE) \
             ORDER BY invoices.created ASC, invoices.id ASC"
        );
    }

    #[test]
    fn test_locked_query_with_filters() {
        let query = InvoiceQuery::new(true)
            .from_team(3)
            .to_team(7)
            .status(InvoiceStatus::NotPaid);
        let sql = select(query.spec()).sql().to_string();

        assert!(sql.contains("invoices.from_team_id = $1"));
        assert!(sql.contains("invoices.to_team_id = $2"));
        assert!(sql.contains("invoices.status = $3"));
        assert!(sql.ends_with("FOR UPDATE NOWAIT"));
    }

    #[test]
    fn test_pivot_renders_each_join_once() {
        let query = InvoiceQuery::new(false)
            .with_ids(&[1, 2])
            .join_payment_submission(JoinKind::Inner)
            .with_status(SubmissionStatus::Submitted)
            .join_invoice(JoinKind::Inner)
            .join_payment_submission(JoinKind::Inner)
            .join_invoice(JoinKind::Inner);
        let sql = select(query.spec()).sql().to_string();

        assert_eq!(sql.matches("JOIN invoice_payment_submission").count(), 1);
        assert_eq!(sql.matches("JOIN payment_submissions").count(), 1);
        assert!(sql.starts_with("SELECT invoices.* FROM invoices"));
        assert!(sql.contains("payment_submissions.status = $2"));
    }

    #[test]
    fn test_left_join_and_submission_root() {
        let query = PaymentSubmissionQuery::new(false)
            .created_by(5)
            .join_invoice(JoinKind::Left)
            .join_payment_histories(JoinKind::Left)
            .join_invoice(JoinKind::Inner)
            .join_payment_submission(JoinKind::Inner);
        let sql = select(query.spec()).sql().to_string();

        assert!(sql.starts_with("SELECT payment_submissions.* FROM payment_submissions"));
        assert!(sql.contains(
            "LEFT JOIN invoice_payment_submission ON \
             payment_submissions.id = invoice_payment_submission.payment_submission_id"
        ));
        assert!(sql.contains("LEFT JOIN payment_histories ON payment_histories.id = invoices.hist_id"));
        assert!(sql.ends_with("ORDER BY payment_submissions.id ASC"));
    }
}
