//! Two wallet purchases racing for the same balance.

mod common;

use std::sync::Arc;

use common::{Fixture, actor, dec};
use kaung_commerce::error::ServiceError;
use kaung_commerce::quick_buy::{QuickBuyRequest, quick_buy};
use kaung_commerce::store::{MemoryStore, Store};
use kaung_commerce::types::{BalanceKind, DeliveryInfo, ProductCategory};
use rust_decimal::Decimal;
use tokio::sync::Barrier;
use uuid::Uuid;

/// Read the balance, check it, then write `current - amount` back.
async fn naive_debit(store: MemoryStore, user_id: Uuid, amount: Decimal, barrier: Arc<Barrier>) -> bool {
    let seen = store
        .get_profile(user_id)
        .await
        .unwrap()
        .unwrap()
        .wallet_balance;
    // Both callers have read before either writes.
    barrier.wait().await;
    if seen < amount {
        return false;
    }
    let current = store.profile(user_id).unwrap().wallet_balance;
    store.overwrite_wallet_balance(user_id, current - amount);
    true
}

#[tokio::test]
async fn check_then_write_overdraws() {
    let fx = Fixture::new();
    let user = fx.customer(1000);
    let barrier = Arc::new(Barrier::new(2));

    let a = tokio::spawn(naive_debit(fx.store.clone(), user.id, dec(600), barrier.clone()));
    let b = tokio::spawn(naive_debit(fx.store.clone(), user.id, dec(600), barrier));
    assert!(a.await.unwrap());
    assert!(b.await.unwrap());

    assert_eq!(fx.store.profile(user.id).unwrap().wallet_balance, dec(-200));
}

#[tokio::test]
async fn conditional_debit_refuses_the_second_purchase() {
    let fx = Fixture::new();
    let user = fx.customer(1000);
    let product = fx.product("PUBG 660 UC", ProductCategory::Pubg, 600, 0);
    let req = || QuickBuyRequest {
        product_id: product.id,
        quantity: 1,
        delivery: DeliveryInfo {
            player_id: Some("5123456789".into()),
            ..Default::default()
        },
    };

    let buyer = actor(&user);
    let (first, second) = tokio::join!(
        quick_buy(&fx.store, &fx.events, &buyer, req(), None),
        quick_buy(&fx.store, &fx.events, &buyer, req(), None),
    );

    let results = [first, second];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(ServiceError::InsufficientBalance { available, required })
            if *available == dec(400) && *required == dec(600)
    )));

    assert_eq!(fx.store.profile(user.id).unwrap().wallet_balance, dec(400));
    assert_eq!(fx.store.orders().len(), 1);
    assert_eq!(fx.store.ledger_entries(user.id, BalanceKind::Wallet).len(), 1);
}
