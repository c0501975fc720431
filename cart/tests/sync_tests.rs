use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::test;
use uuid::Uuid;

use cart::model::{Cart, CartLineItem, CartOwner, ClientCartSnapshot, ClientLineItem, LineKey};
use cart::resolver::{Side, SyncStrategy};
use cart::{AddItemRequest, CartSyncService, RepositoryCartLinks, SyncError, SyncRequest};
use common::audit::MemoryAuditSink;
use common::time::{Clock, ManualClock, from_ms};
use ledger::error::LedgerError;
use ledger::model::ReservationStatus;
use ledger::store::memory::InMemoryReservationStore;
use ledger::{LedgerConfig, ReservationLedger};

use mock_repository::{FixedStockOracle, InMemoryCartRepository};

struct Harness {
    service: CartSyncService,
    ledger: Arc<ReservationLedger>,
    repo: Arc<InMemoryCartRepository>,
    oracle: FixedStockOracle,
    clock: Arc<ManualClock>,
    audit: MemoryAuditSink,
}

fn t0() -> DateTime<Utc> {
    from_ms(1_700_000_000_000)
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let oracle = FixedStockOracle::default();
    let repo = Arc::new(InMemoryCartRepository::default());
    let audit = MemoryAuditSink::new();

    let ledger = Arc::new(
        ReservationLedger::new(
            LedgerConfig::default(),
            Arc::new(InMemoryReservationStore::new(clock.clone())),
            Arc::new(oracle.clone()),
            clock.clone(),
        )
        .with_links(Arc::new(RepositoryCartLinks::new(repo.clone()))),
    );

    let service = CartSyncService::new(repo.clone(), ledger.clone()).with_audit(Arc::new(audit.clone()));

    Harness {
        service,
        ledger,
        repo,
        oracle,
        clock,
        audit,
    }
}

fn line(cart_id: Uuid, variant_id: Uuid, quantity: u32, at: DateTime<Utc>) -> CartLineItem {
    CartLineItem {
        id: Uuid::new_v5(&cart_id, variant_id.as_bytes()),
        variant_id,
        quantity,
        locked_price: 1_000,
        price_lock_expires_at: None,
        campaign: None,
        reservation_id: None,
        valid: true,
        added_at: at,
        updated_at: at,
    }
}

async fn seed(h: &Harness, owner: CartOwner, version: u64, lines: &[(Uuid, u32, DateTime<Utc>)]) -> Cart {
    let mut cart = Cart::new(Uuid::new_v4(), owner, "USD", t0());
    cart.version = version;
    cart.items = lines
        .iter()
        .map(|(variant, qty, at)| line(cart.id, *variant, *qty, *at))
        .collect();
    cart.recompute_totals();
    h.repo.insert(cart.clone()).await;
    cart
}

fn client(variant_id: Uuid, quantity: u32, modified_at: Option<DateTime<Utc>>) -> ClientLineItem {
    ClientLineItem {
        variant_id,
        quantity,
        unit_price: 1_000,
        campaign: None,
        modified_at,
    }
}

fn sync_as(user_id: Uuid, version: u64, items: Vec<ClientLineItem>, sent: DateTime<Utc>) -> SyncRequest {
    SyncRequest {
        user_id: Some(user_id),
        session_id: None,
        snapshot: ClientCartSnapshot {
            version,
            items,
            client_timestamp: sent,
        },
    }
}

fn add(user_id: Uuid, variant_id: Uuid, quantity: u32) -> AddItemRequest {
    AddItemRequest {
        user_id: Some(user_id),
        session_id: None,
        variant_id,
        quantity,
        unit_price: 1_000,
        campaign: None,
    }
}

#[test]
async fn diverged_snapshot_is_merged_and_persisted() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    h.oracle.set(a, 10).await;
    h.oracle.set(b, 10).await;

    let now = h.clock.now();
    let cart = seed(&h, CartOwner::User(user), 3, &[(a, 2, now - Duration::minutes(5))]).await;

    let req = sync_as(
        user,
        2,
        vec![client(a, 1, Some(now - Duration::minutes(20))), client(b, 1, None)],
        now,
    );
    let outcome = h.service.sync(req).await?;

    assert_eq!(outcome.strategy, SyncStrategy::Merge);
    assert_eq!(outcome.cart.version, 4);
    assert_eq!(outcome.added, 1);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].winner, Side::Server);
    assert_eq!(outcome.cart.total_items, 3);
    assert_eq!(outcome.cart.total_amount, 3_000);

    let stored = h.repo.get(cart.id).await.unwrap();
    assert_eq!(stored, outcome.cart);

    let events = h.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "sync");
    assert!(events[0].is_success());
    Ok(())
}

#[test]
async fn matching_versions_fast_apply_client_lines() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 10).await;

    let cart = seed(&h, CartOwner::User(user), 7, &[(a, 1, t0())]).await;

    let outcome = h
        .service
        .sync(sync_as(user, 7, vec![client(a, 4, None)], h.clock.now()))
        .await?;

    assert_eq!(outcome.strategy, SyncStrategy::FastApply);
    assert!(outcome.conflicts.is_empty());
    assert_eq!(outcome.cart.version, 8);
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.cart.items[0].id, cart.items[0].id);
    assert_eq!(outcome.cart.items[0].quantity, 4);
    Ok(())
}

#[test]
async fn identity_must_be_exactly_one_of_user_or_session() -> anyhow::Result<()> {
    let h = harness();
    let snapshot = ClientCartSnapshot {
        version: 1,
        items: vec![],
        client_timestamp: h.clock.now(),
    };

    let neither = SyncRequest {
        user_id: None,
        session_id: Some(String::new()),
        snapshot: snapshot.clone(),
    };
    assert!(matches!(h.service.sync(neither).await, Err(SyncError::MissingIdentity)));

    let both = SyncRequest {
        user_id: Some(Uuid::new_v4()),
        session_id: Some("guest-1".into()),
        snapshot,
    };
    assert!(matches!(h.service.sync(both).await, Err(SyncError::AmbiguousIdentity)));

    // Rejections are audited too.
    let events = h.audit.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| !e.is_success()));

    // Each call gets its own trace id.
    let traces: Vec<&String> = events.iter().map(|e| &e.attributes["trace_id"]).collect();
    assert_eq!(traces[0].len(), 36);
    assert_ne!(traces[0], traces[1]);
    Ok(())
}

#[test]
async fn unknown_cart_is_rejected() -> anyhow::Result<()> {
    let h = harness();
    let req = SyncRequest {
        user_id: None,
        session_id: Some("guest-404".into()),
        snapshot: ClientCartSnapshot {
            version: 0,
            items: vec![],
            client_timestamp: h.clock.now(),
        },
    };

    let err = h.service.sync(req).await.unwrap_err();
    assert!(matches!(err, SyncError::CartNotFound(_)));
    assert_eq!(err.to_string(), "no cart for guest:guest-404");
    Ok(())
}

#[test]
async fn merge_that_outgrows_stock_is_unresolvable() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 3).await;

    let now = h.clock.now();
    let cart = seed(&h, CartOwner::User(user), 5, &[(a, 2, now - Duration::hours(1))]).await;

    // Client edit is newer, so its quantity wins the merge.
    let req = sync_as(user, 4, vec![client(a, 8, Some(now - Duration::minutes(1)))], now);
    let err = h.service.sync(req).await.unwrap_err();

    assert!(matches!(err, SyncError::UnresolvableConflict { requested: 8, available: 3, .. }));
    assert_eq!(err.shortfall(), Some(5));
    assert_eq!(h.repo.get(cart.id).await.unwrap().version, 5);
    Ok(())
}

#[test]
async fn fast_apply_that_outgrows_stock_is_insufficient_inventory() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 2).await;
    seed(&h, CartOwner::User(user), 1, &[(a, 1, t0())]).await;

    let err = h
        .service
        .sync(sync_as(user, 1, vec![client(a, 3, None)], h.clock.now()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InsufficientInventory { requested: 3, available: 2, .. }));
    assert!(!err.is_retryable());
    Ok(())
}

#[test]
async fn own_holds_count_toward_validation() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 5).await;

    let cart = h.service.add_item(add(user, a, 5)).await?;
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 0);

    // Nothing free, but the cart already holds all five.
    let outcome = h
        .service
        .sync(sync_as(user, cart.version, vec![client(a, 5, None)], h.clock.now()))
        .await?;

    assert_eq!(outcome.cart.version, cart.version + 1);
    assert_eq!(outcome.cart.items[0].reservation_id, cart.items[0].reservation_id);
    Ok(())
}

#[test]
async fn lost_race_is_a_retryable_version_conflict() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 10).await;
    let cart = seed(&h, CartOwner::User(user), 2, &[(a, 1, t0())]).await;

    *h.repo.race_next_save.lock().await = true;
    let err = h
        .service
        .sync(sync_as(user, 2, vec![client(a, 2, None)], h.clock.now()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::VersionConflict { expected: 2, .. }));
    assert!(err.is_retryable());
    // Only the simulated concurrent writer's bump landed.
    assert_eq!(h.repo.get(cart.id).await.unwrap().items[0].quantity, 1);
    // The hold placed for the lost write was given back.
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 10);
    Ok(())
}

#[test]
async fn synced_lines_are_held_at_their_new_quantity() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    h.oracle.set(a, 10).await;
    h.oracle.set(b, 10).await;

    let cart = h.service.add_item(add(user, a, 2)).await?;
    let a_hold = cart.items[0].reservation_id.clone().unwrap();

    let outcome = h
        .service
        .sync(sync_as(
            user,
            cart.version,
            vec![client(a, 6, None), client(b, 3, None)],
            h.clock.now(),
        ))
        .await?;

    // The grown line keeps its hold, resized; the new line gets one of its own.
    let line_a = outcome.cart.items.iter().find(|i| i.variant_id == a).unwrap();
    let line_b = outcome.cart.items.iter().find(|i| i.variant_id == b).unwrap();
    assert_eq!(line_a.reservation_id, Some(a_hold.clone()));
    assert_eq!(h.ledger.get(&a_hold).await?.unwrap().quantity, 6);
    let b_hold = h.ledger.get(line_b.reservation_id.as_ref().unwrap()).await?.unwrap();
    assert_eq!(b_hold.quantity, 3);
    assert_eq!(b_hold.cart_item_id, line_b.id);

    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 4);
    assert_eq!(h.ledger.check_availability(b).await?.available_quantity, 7);
    assert_eq!(h.repo.get(cart.id).await.unwrap(), outcome.cart);

    // Lowering a line trims its hold after the save.
    let outcome = h
        .service
        .sync(sync_as(
            user,
            outcome.cart.version,
            vec![client(a, 1, None), client(b, 3, None)],
            h.clock.now(),
        ))
        .await?;
    assert_eq!(outcome.cart.total_items, 4);
    assert_eq!(h.ledger.get(&a_hold).await?.unwrap().quantity, 1);
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 9);
    Ok(())
}

#[test]
async fn failed_sync_save_undoes_hold_changes() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    h.oracle.set(a, 10).await;
    h.oracle.set(b, 10).await;

    let cart = h.service.add_item(add(user, a, 2)).await?;
    let a_hold = cart.items[0].reservation_id.clone().unwrap();

    *h.repo.fail_saves.lock().await = true;
    let err = h
        .service
        .sync(sync_as(
            user,
            cart.version,
            vec![client(a, 5, None), client(b, 4, None)],
            h.clock.now(),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::StoreUnavailable(_)));
    assert_eq!(h.ledger.get(&a_hold).await?.unwrap().quantity, 2);
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 8);
    assert_eq!(h.ledger.check_availability(b).await?.available_quantity, 10);
    Ok(())
}

#[test]
async fn stock_outage_fails_sync_closed() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    seed(&h, CartOwner::User(user), 1, &[(a, 1, t0())]).await;
    h.oracle.go_offline().await;

    let err = h
        .service
        .sync(sync_as(user, 1, vec![client(a, 1, None)], h.clock.now()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Ledger(LedgerError::StockUnavailable(_))));
    assert!(err.is_retryable());
    Ok(())
}

#[test]
async fn add_item_creates_cart_and_holds_stock() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 10).await;

    let cart = h.service.add_item(add(user, a, 2)).await?;

    assert_eq!(cart.version, 1);
    assert_eq!(cart.owner, CartOwner::User(user));
    assert_eq!(cart.total_items, 2);
    assert!(cart.items[0].reservation_id.is_some());
    assert_eq!(cart.items[0].price_lock_expires_at, Some(t0() + Duration::minutes(15)));
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 8);

    // Topping up grows the same hold to the new total.
    let first_hold = cart.items[0].reservation_id.clone().unwrap();
    h.clock.advance(Duration::seconds(1));
    let cart = h.service.add_item(add(user, a, 3)).await?;

    assert_eq!(cart.version, 2);
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);
    assert_eq!(cart.items[0].reservation_id, Some(first_hold.clone()));
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 5);

    let hold = h.ledger.get(&first_hold).await?.unwrap();
    assert_eq!(hold.status, ReservationStatus::Active);
    assert_eq!(hold.quantity, 5);
    Ok(())
}

#[test]
async fn failed_top_up_keeps_the_original_hold() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 10).await;

    let cart = h.service.add_item(add(user, a, 2)).await?;
    let first_hold = cart.items[0].reservation_id.clone().unwrap();

    *h.repo.fail_saves.lock().await = true;
    let err = h.service.add_item(add(user, a, 3)).await.unwrap_err();
    assert!(matches!(err, SyncError::StoreUnavailable(_)));

    let stored = h.repo.get(cart.id).await.unwrap();
    assert_eq!(stored.items[0].quantity, 2);
    assert_eq!(stored.items[0].reservation_id, Some(first_hold.clone()));

    let hold = h.ledger.get(&first_hold).await?.unwrap();
    assert_eq!(hold.status, ReservationStatus::Active);
    assert_eq!(hold.quantity, 2);
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 8);

    *h.repo.fail_saves.lock().await = false;
    let converted = h.service.convert_for_checkout(Some(user), None).await?;
    assert_eq!(converted, vec![first_hold]);
    Ok(())
}

#[test]
async fn top_up_beyond_stock_leaves_the_hold_alone() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 4).await;

    let cart = h.service.add_item(add(user, a, 3)).await?;
    let first_hold = cart.items[0].reservation_id.clone().unwrap();

    let err = h.service.add_item(add(user, a, 2)).await.unwrap_err();
    assert!(matches!(err, SyncError::InsufficientInventory { requested: 5, available: 4, .. }));
    assert_eq!(h.ledger.get(&first_hold).await?.unwrap().quantity, 3);
    assert_eq!(h.repo.get(cart.id).await.unwrap().version, cart.version);
    Ok(())
}

#[test]
async fn top_up_reprices_the_line() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 10).await;
    h.service.add_item(add(user, a, 1)).await?;

    // A cheaper offer while the lock holds lowers the price.
    let cheaper = AddItemRequest {
        unit_price: 800,
        ..add(user, a, 1)
    };
    let cart = h.service.add_item(cheaper).await?;
    assert_eq!(cart.items[0].locked_price, 800);
    assert_eq!(cart.total_amount, 1_600);

    // Once hold and lock have lapsed, the line is re-locked at today's price.
    h.clock.advance(Duration::minutes(16));
    let pricier = AddItemRequest {
        unit_price: 1_500,
        ..add(user, a, 1)
    };
    let cart = h.service.add_item(pricier).await?;
    assert_eq!(cart.items[0].locked_price, 1_500);
    assert_eq!(
        cart.items[0].price_lock_expires_at,
        Some(h.clock.now() + Duration::minutes(15))
    );
    assert_eq!(cart.total_amount, 4_500);
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 7);
    Ok(())
}

#[test]
async fn add_item_beyond_stock_creates_nothing() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 1).await;

    let err = h.service.add_item(add(user, a, 2)).await.unwrap_err();

    assert_eq!(err.shortfall(), Some(1));
    assert!(h.repo.by_owner(&CartOwner::User(user)).await.is_none());
    Ok(())
}

#[test]
async fn failed_save_gives_the_hold_back() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 4).await;
    *h.repo.fail_saves.lock().await = true;

    let err = h.service.add_item(add(user, a, 4)).await.unwrap_err();

    assert!(matches!(err, SyncError::StoreUnavailable(_)));
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 4);
    Ok(())
}

#[test]
async fn remove_item_releases_its_hold() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 6).await;
    h.service.add_item(add(user, a, 6)).await?;

    let key = LineKey {
        variant_id: a,
        campaign: None,
    };
    let cart = h.service.remove_item(Some(user), None, &key).await?;

    assert!(cart.items.is_empty());
    assert_eq!(cart.total_amount, 0);
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 6);

    // Second removal is a no-op.
    let again = h.service.remove_item(Some(user), None, &key).await?;
    assert_eq!(again.version, cart.version);
    Ok(())
}

#[test]
async fn sync_that_drops_a_line_releases_its_hold() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    h.oracle.set(a, 3).await;
    h.oracle.set(b, 3).await;
    h.service.add_item(add(user, a, 3)).await?;
    let cart = h.service.add_item(add(user, b, 1)).await?;

    let outcome = h
        .service
        .sync(sync_as(user, cart.version, vec![client(b, 1, None)], h.clock.now()))
        .await?;

    assert_eq!(outcome.removed, 1);
    assert_eq!(h.ledger.check_availability(a).await?.available_quantity, 3);
    assert_eq!(h.ledger.check_availability(b).await?.available_quantity, 2);
    Ok(())
}

#[test]
async fn checkout_converts_every_hold() -> anyhow::Result<()> {
    let h = harness();
    let session = "guest-42";
    let a = Uuid::new_v4();
    h.oracle.set(a, 5).await;

    let req = AddItemRequest {
        user_id: None,
        session_id: Some(session.into()),
        ..add(Uuid::nil(), a, 2)
    };
    h.service.add_item(req).await?;

    let converted = h.service.convert_for_checkout(None, Some(session)).await?;

    assert_eq!(converted.len(), 1);
    let hold = h.ledger.get(&converted[0]).await?.unwrap();
    assert_eq!(hold.status, ReservationStatus::Converted);
    Ok(())
}

#[test]
async fn checkout_refuses_lines_whose_hold_lapsed() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    h.oracle.set(a, 5).await;
    h.oracle.set(b, 5).await;

    let first = h.service.add_item(add(user, a, 1)).await?;
    let a_hold = first.items[0].reservation_id.clone().unwrap();

    // b is added late enough that only a's hold lapses.
    h.clock.advance(Duration::minutes(10));
    let cart = h.service.add_item(add(user, b, 1)).await?;
    let b_hold = cart.items[1].reservation_id.clone().unwrap();
    h.clock.advance(Duration::minutes(6));

    let err = h.service.convert_for_checkout(Some(user), None).await.unwrap_err();
    match &err {
        SyncError::UncoveredLines { cart_id, lines } => {
            assert_eq!(*cart_id, cart.id);
            assert_eq!(lines.as_slice(), &[cart.items[0].key()]);
        }
        other => panic!("expected UncoveredLines, got {other:?}"),
    }
    assert_eq!(h.ledger.get(&b_hold).await?.unwrap().status, ReservationStatus::Active);

    // Released holds are refused the same way.
    h.ledger.release(&b_hold).await?;
    let err = h.service.convert_for_checkout(Some(user), None).await.unwrap_err();
    assert!(matches!(err, SyncError::UncoveredLines { ref lines, .. } if lines.len() == 2));
    assert_ne!(h.ledger.get(&a_hold).await?.unwrap().status, ReservationStatus::Converted);

    // A sync re-places both holds and checkout goes through.
    let stored = h.repo.get(cart.id).await.unwrap();
    h.service
        .sync(sync_as(
            user,
            stored.version,
            vec![client(a, 1, None), client(b, 1, None)],
            h.clock.now(),
        ))
        .await?;
    let converted = h.service.convert_for_checkout(Some(user), None).await?;
    assert_eq!(converted.len(), 2);
    for id in &converted {
        assert_eq!(h.ledger.get(id).await?.unwrap().status, ReservationStatus::Converted);
    }

    let failed: Vec<_> = h.audit.events().into_iter().filter(|e| !e.is_success()).collect();
    assert_eq!(failed.len(), 2);
    Ok(())
}

#[test]
async fn sweep_clears_the_cart_back_reference() -> anyhow::Result<()> {
    let h = harness();
    let user = Uuid::new_v4();
    let a = Uuid::new_v4();
    h.oracle.set(a, 5).await;
    let cart = h.service.add_item(add(user, a, 2)).await?;

    h.clock.advance(Duration::minutes(16));
    let report = h.ledger.sweep().await?;

    assert_eq!(report.expired, 1);
    let stored = h.repo.get(cart.id).await.unwrap();
    assert_eq!(stored.items[0].reservation_id, None);
    assert_eq!(stored.version, cart.version + 1);
    Ok(())
}
