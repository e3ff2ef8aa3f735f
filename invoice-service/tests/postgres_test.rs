//! Integration tests against a real PostgreSQL database.
//!
//! Run with `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.

mod common;

use common::{dec, init_tracing};
use invoice_service::models::{
    Agent, InvoiceStatus, InvoiceType, NewInvoice, SubmissionStatus, Team, TeamType,
};
use invoice_service::query::{InvoiceQuery, PaymentSubmissionQuery};
use invoice_service::services::{
    Database, InvoiceManage, LedgerError, PaymentSubmissionMutation, ReadjustAmount,
};
use invoice_service::store::{LedgerStore, PgStore, TeamDirectory};
use serial_test::serial;

async fn database() -> Database {
    init_tracing();
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let db = Database::new(&url, 4, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

async fn create_team(db: &Database, name: &str, team_type: TeamType) -> Team {
    let id: i64 = sqlx::query_scalar("INSERT INTO teams (name, type) VALUES ($1, $2) RETURNING id")
        .bind(name)
        .bind(team_type.as_str())
        .fetch_one(db.pool())
        .await
        .expect("Failed to insert team");

    let mut conn = db.pool().acquire().await.unwrap();
    PgStore::new(&mut conn)
        .get_team(id)
        .await
        .unwrap()
        .expect("team just inserted")
}

#[tokio::test]
#[ignore]
#[serial]
async fn readjust_round_trips_through_postgres() {
    let db = database().await;
    let seller = create_team(&db, "pg seller", TeamType::Selling).await;
    let warehouse = create_team(&db, "pg warehouse", TeamType::Warehouse).await;
    let order_id = seller.id * 1000 + 1;

    let mut tx = db.begin().await.unwrap();
    let paid = PgStore::new(&mut tx)
        .insert_invoice(
            &NewInvoice::new(seller.id, warehouse.id, InvoiceType::ShipFee, dec(2000))
                .with_status(InvoiceStatus::Paid)
                .with_order_id(Some(order_id)),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let mut store = PgStore::new(&mut tx);
    let mut manage = InvoiceManage::new(&mut store);
    manage
        .load(
            &InvoiceQuery::new(true)
                .from_team(seller.id)
                .to_team(warehouse.id)
                .order_id(order_id),
        )
        .await
        .unwrap();
    let outcome = manage
        .readjust_amount(&ReadjustAmount {
            from_team_id: seller.id,
            to_team_id: warehouse.id,
            amount: dec(4000),
            tx_id: None,
            order_id: Some(order_id),
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let created = outcome.created.expect("remainder invoice");
    assert_eq!(created.amount, dec(2000));
    assert_eq!(created.status, InvoiceStatus::NotPaid);

    let mut conn = db.pool().acquire().await.unwrap();
    let reloaded = PgStore::new(&mut conn)
        .find_invoices(&InvoiceQuery::new(false).with_ids(&[paid.id]))
        .await
        .unwrap();
    assert_eq!(reloaded[0].status, InvoiceStatus::Paid);
}

#[tokio::test]
#[ignore]
#[serial]
async fn submission_accept_in_postgres() {
    let db = database().await;
    let seller = create_team(&db, "pg payer", TeamType::Selling).await;
    let warehouse = create_team(&db, "pg payee", TeamType::Warehouse).await;

    let mut tx = db.begin().await.unwrap();
    let mut store = PgStore::new(&mut tx);
    for amount in [300, 700] {
        store
            .insert_invoice(&NewInvoice::new(
                seller.id,
                warehouse.id,
                InvoiceType::Product,
                dec(amount),
            ))
            .await
            .unwrap();
    }
    let submission = PaymentSubmissionMutation::new(&mut store, Agent::user(1))
        .create_submission(
            &InvoiceQuery::new(true).from_team(seller.id).to_team(warehouse.id),
            "pg-receipt",
            dec(1000),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let mut store = PgStore::new(&mut tx);
    let mut mutation = PaymentSubmissionMutation::new(&mut store, Agent::user(2));
    mutation
        .load_from_query(&PaymentSubmissionQuery::new(true).with_submission(submission.id))
        .await
        .unwrap();
    let outcome = mutation.accept_submission().await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(outcome.paid_invoice_ids.len(), 2);
    assert_eq!(outcome.history.amount, dec(1000));

    let mut conn = db.pool().acquire().await.unwrap();
    let mut store = PgStore::new(&mut conn);
    let accepted = store
        .find_submissions(
            &PaymentSubmissionQuery::new(false)
                .with_submission(submission.id)
                .with_status(SubmissionStatus::Accepted),
        )
        .await
        .unwrap();
    assert_eq!(accepted.len(), 1);

    let paid = store
        .find_invoices(
            &InvoiceQuery::new(false)
                .from_team(seller.id)
                .status(InvoiceStatus::Paid),
        )
        .await
        .unwrap();
    assert!(paid.iter().all(|i| i.hist_id == Some(outcome.history.id)));
}

#[tokio::test]
#[ignore]
#[serial]
async fn nowait_lock_surfaces_as_conflict() {
    let db = database().await;
    let seller = create_team(&db, "pg locker", TeamType::Selling).await;
    let warehouse = create_team(&db, "pg locked", TeamType::Warehouse).await;

    let mut tx = db.begin().await.unwrap();
    PgStore::new(&mut tx)
        .insert_invoice(&NewInvoice::new(
            seller.id,
            warehouse.id,
            InvoiceType::Product,
            dec(10),
        ))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let query = InvoiceQuery::new(true).from_team(seller.id);

    let mut first = db.begin().await.unwrap();
    let held = PgStore::new(&mut first).find_invoices(&query).await.unwrap();
    assert_eq!(held.len(), 1);

    let mut second = db.begin().await.unwrap();
    let err = PgStore::new(&mut second)
        .find_invoices(&query)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::LockConflict(_)));
    second.rollback().await.unwrap();

    first.rollback().await.unwrap();
}

async fn seed_unpaid(db: &Database, from: &Team, to: &Team, amount: i64) {
    let mut tx = db.begin().await.unwrap();
    PgStore::new(&mut tx)
        .insert_invoice(&NewInvoice::new(
            from.id,
            to.id,
            InvoiceType::Product,
            dec(amount),
        ))
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn second_submission_after_commit_is_rejected() {
    let db = database().await;
    let seller = create_team(&db, "pg racer", TeamType::Selling).await;
    let warehouse = create_team(&db, "pg race target", TeamType::Warehouse).await;
    seed_unpaid(&db, &seller, &warehouse, 500).await;
    let query = InvoiceQuery::new(true).from_team(seller.id).to_team(warehouse.id);

    let mut first = db.begin().await.unwrap();
    let mut second = db.begin().await.unwrap();

    PaymentSubmissionMutation::new(&mut PgStore::new(&mut first), Agent::user(1))
        .create_submission(&query, "first", dec(500))
        .await
        .unwrap();
    first.commit().await.unwrap();

    let err = PaymentSubmissionMutation::new(&mut PgStore::new(&mut second), Agent::user(2))
        .create_submission(&query, "second", dec(500))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Amount(_)));
    second.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn second_accept_after_commit_is_rejected() {
    let db = database().await;
    let seller = create_team(&db, "pg double payer", TeamType::Selling).await;
    let warehouse = create_team(&db, "pg double payee", TeamType::Warehouse).await;
    seed_unpaid(&db, &seller, &warehouse, 250).await;

    let mut tx = db.begin().await.unwrap();
    let submission = PaymentSubmissionMutation::new(&mut PgStore::new(&mut tx), Agent::user(1))
        .create_submission(
            &InvoiceQuery::new(true).from_team(seller.id).to_team(warehouse.id),
            "pg-double",
            dec(250),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let by_id = PaymentSubmissionQuery::new(true).with_submission(submission.id);
    let mut first = db.begin().await.unwrap();
    let mut second = db.begin().await.unwrap();

    let mut store = PgStore::new(&mut first);
    let mut reviewer = PaymentSubmissionMutation::new(&mut store, Agent::user(2));
    reviewer.load_from_query(&by_id).await.unwrap();
    reviewer.accept_submission().await.unwrap();
    first.commit().await.unwrap();

    let mut store = PgStore::new(&mut second);
    let mut late = PaymentSubmissionMutation::new(&mut store, Agent::user(3));
    let loaded = late.load_from_query(&by_id).await.unwrap();
    assert_eq!(loaded.status, SubmissionStatus::Accepted);
    let err = late.accept_submission().await.unwrap_err();
    assert!(matches!(err, LedgerError::Consistency(_)));
    second.rollback().await.unwrap();
}
