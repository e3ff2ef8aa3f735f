//! Integration tests for credit-limit configuration and evaluation.

mod common;

use common::{dec, ledger_with_teams, seed_unpaid};
use invoice_service::models::{InvoiceType, LimitType, SetLimitInvoice, TeamType};
use invoice_service::services::{
    limit_invoice_cache_key, Cache, LedgerError, LimitInvoiceService, LocalCache,
};
use invoice_service::store::LedgerStore;
use std::sync::Arc;
use std::time::Duration;

fn service() -> (LimitInvoiceService, Arc<LocalCache>) {
    let cache = Arc::new(LocalCache::new());
    (
        LimitInvoiceService::new(cache.clone(), Duration::from_secs(60)),
        cache,
    )
}

fn limit(team_id: i64, for_team_id: Option<i64>, threshold: i64) -> SetLimitInvoice {
    SetLimitInvoice {
        team_id,
        for_team_id,
        threshold: dec(threshold),
    }
}

#[tokio::test]
async fn unconfigured_team_is_unrestricted() {
    let (ledger, seller, warehouse) = ledger_with_teams();
    seed_unpaid(&ledger, &seller, &warehouse, InvoiceType::Product, 10_000).await;
    let (limits, _) = service();

    let mut session = ledger.begin();
    let result = limits
        .get_limit_invoice(&mut session, warehouse.id, seller.id)
        .await
        .unwrap();

    assert_eq!(result.unpaid_amount, dec(10_000));
    assert_eq!(result.threshold, dec(0));
    assert_eq!(result.limit_type, None);
    assert!(result.can_create_order);
}

#[tokio::test]
async fn default_limit_blocks_at_threshold() {
    let (ledger, seller, warehouse) = ledger_with_teams();
    seed_unpaid(&ledger, &seller, &warehouse, InvoiceType::Product, 500).await;
    let (limits, _) = service();

    let mut session = ledger.begin();
    limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, None, 500))
        .await
        .unwrap();
    session.commit().unwrap();

    let mut session = ledger.begin();
    let result = limits
        .get_limit_invoice(&mut session, warehouse.id, seller.id)
        .await
        .unwrap();

    assert_eq!(result.limit_type, Some(LimitType::Default));
    assert_eq!(result.threshold, dec(500));
    assert!(!result.can_create_order);
}

#[tokio::test]
async fn team_limit_overrides_default() {
    let (ledger, seller, warehouse) = ledger_with_teams();
    let other = ledger.add_team("other seller", TeamType::Selling);
    seed_unpaid(&ledger, &seller, &warehouse, InvoiceType::Product, 800).await;
    seed_unpaid(&ledger, &other, &warehouse, InvoiceType::Product, 800).await;
    let (limits, _) = service();

    let mut session = ledger.begin();
    limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, None, 500))
        .await
        .unwrap();
    limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, Some(seller.id), 1000))
        .await
        .unwrap();

    let trusted = limits
        .get_limit_invoice(&mut session, warehouse.id, seller.id)
        .await
        .unwrap();
    assert_eq!(trusted.limit_type, Some(LimitType::Team));
    assert!(trusted.can_create_order);

    let untrusted = limits
        .get_limit_invoice(&mut session, warehouse.id, other.id)
        .await
        .unwrap();
    assert_eq!(untrusted.limit_type, Some(LimitType::Default));
    assert!(!untrusted.can_create_order);
}

#[tokio::test]
async fn evaluation_is_served_from_cache() {
    let (ledger, seller, warehouse) = ledger_with_teams();
    seed_unpaid(&ledger, &seller, &warehouse, InvoiceType::Product, 100).await;
    let (limits, cache) = service();

    let mut session = ledger.begin();
    let first = limits
        .get_limit_invoice(&mut session, warehouse.id, seller.id)
        .await
        .unwrap();
    assert!(cache
        .get(&limit_invoice_cache_key(warehouse.id, seller.id))
        .await
        .unwrap()
        .is_some());

    seed_unpaid(&ledger, &seller, &warehouse, InvoiceType::Product, 900).await;

    let mut session = ledger.begin();
    let cached = limits
        .get_limit_invoice(&mut session, warehouse.id, seller.id)
        .await
        .unwrap();
    assert_eq!(cached, first);

    let (fresh, _) = service();
    let recomputed = fresh
        .get_limit_invoice(&mut session, warehouse.id, seller.id)
        .await
        .unwrap();
    assert_eq!(recomputed.unpaid_amount, dec(1000));
}

#[tokio::test]
async fn limit_requests_are_validated() {
    let (ledger, seller, _) = ledger_with_teams();
    let (limits, _) = service();
    let mut session = ledger.begin();

    let err = limits
        .get_limit_invoice(&mut session, 0, seller.id)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = limits
        .set_limit_invoice(&mut session, &limit(0, None, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = limits
        .set_limit_invoice(&mut session, &limit(seller.id, Some(9999), 10))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));

    let err = limits
        .limit_invoice_delete(&mut session, 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn setting_a_limit_twice_updates_it() {
    let (ledger, seller, warehouse) = ledger_with_teams();
    let (limits, _) = service();

    let mut session = ledger.begin();
    let first = limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, Some(seller.id), 100))
        .await
        .unwrap();
    let second = limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, Some(seller.id), 250))
        .await
        .unwrap();
    session.commit().unwrap();

    assert_eq!(first.id, second.id);
    let stored = ledger.limits();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].threshold, dec(250));
    assert_eq!(stored[0].limit_type, LimitType::Team);
}

#[tokio::test]
async fn delete_with_counterpart_keeps_default() {
    let (ledger, seller, warehouse) = ledger_with_teams();
    let (limits, _) = service();

    let mut session = ledger.begin();
    limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, None, 100))
        .await
        .unwrap();
    limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, Some(seller.id), 300))
        .await
        .unwrap();

    let deleted = limits
        .limit_invoice_delete(&mut session, warehouse.id, Some(seller.id))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let remaining = limits
        .limit_invoice_list(&mut session, warehouse.id)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].config.limit_type, LimitType::Default);

    let deleted = limits
        .limit_invoice_delete(&mut session, warehouse.id, None)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    session.commit().unwrap();

    assert!(ledger.limits().is_empty());
}

#[tokio::test]
async fn list_preloads_teams() {
    let (ledger, seller, warehouse) = ledger_with_teams();
    let (limits, _) = service();

    let mut session = ledger.begin();
    limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, Some(seller.id), 300))
        .await
        .unwrap();

    let items = limits
        .limit_invoice_list(&mut session, warehouse.id)
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].team.as_ref().map(|t| t.id), Some(warehouse.id));
    assert_eq!(
        items[0].for_team.as_ref().map(|t| t.name.as_str()),
        Some("seller")
    );
}

#[tokio::test]
async fn determined_limits_report_debt_split() {
    let (ledger, seller, warehouse) = ledger_with_teams();
    let quiet = ledger.add_team("quiet warehouse", TeamType::Warehouse);
    let submitted = seed_unpaid(&ledger, &seller, &warehouse, InvoiceType::Product, 100).await;
    seed_unpaid(&ledger, &seller, &warehouse, InvoiceType::ShipFee, 50).await;
    let (limits, _) = service();

    let mut session = ledger.begin();
    session
        .set_has_submission(&[submitted.id], true)
        .await
        .unwrap();
    limits
        .set_limit_invoice(&mut session, &limit(warehouse.id, Some(seller.id), 1000))
        .await
        .unwrap();
    limits
        .set_limit_invoice(&mut session, &limit(quiet.id, Some(seller.id), 200))
        .await
        .unwrap();

    let empty = limits
        .determined_limit_invoice(&mut session, seller.id, &[])
        .await
        .unwrap();
    assert!(empty.is_empty());

    let mut determined = limits
        .determined_limit_invoice(&mut session, seller.id, &[warehouse.id, quiet.id])
        .await
        .unwrap();
    determined.sort_by_key(|d| d.config.team_id);
    assert_eq!(determined.len(), 2);

    let busy = &determined[0];
    assert_eq!(busy.team.as_ref().map(|t| t.id), Some(warehouse.id));
    assert_eq!(busy.for_team.as_ref().map(|t| t.id), Some(seller.id));
    assert_eq!(busy.invoice_status.total, dec(150));
    assert_eq!(busy.invoice_status.submission_amount, dec(100));
    assert_eq!(busy.invoice_status.unpaid_amount, dec(50));

    let idle = &determined[1];
    assert_eq!(idle.invoice_status.to_team_id, quiet.id);
    assert_eq!(idle.for_team.as_ref().map(|t| t.name.as_str()), Some("seller"));
    assert_eq!(idle.invoice_status.total, dec(0));
}
