mod common;

use chrono::{Duration, Utc};
use common::{Fixture, actor, dec};
use kaung_commerce::checkout::{CartLine, CheckoutRequest, checkout};
use kaung_commerce::deposits::{self, DepositRequest};
use kaung_commerce::error::ServiceError;
use kaung_commerce::ledger;
use kaung_commerce::moderation::{bulk_transition, transition};
use kaung_commerce::orders;
use kaung_commerce::quick_buy::{QuickBuyRequest, quick_buy};
use kaung_commerce::realtime::{self, OrderEventKind};
use kaung_commerce::reports::{self, ReportRequest};
use kaung_commerce::storage::Upload;
use kaung_commerce::store::Store;
use kaung_commerce::types::{
    AccountStatus, BalanceKind, DeliveryInfo, LedgerType, ModerationAction, NewOrder, OrderStatus,
    Page, PaymentMethod, ProductCategory, ReportStatus,
};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

fn delivery() -> DeliveryInfo {
    DeliveryInfo {
        customer_name: Some("Aung Aung".into()),
        phone: Some("09123456789".into()),
        address: Some("Yangon".into()),
        ..Default::default()
    }
}

fn topup(product_id: Uuid) -> QuickBuyRequest {
    QuickBuyRequest {
        product_id,
        quantity: 1,
        delivery: DeliveryInfo {
            player_id: Some("55667788".into()),
            server_id: Some("2101".into()),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn cod_checkout_creates_one_order_per_line() {
    let fx = Fixture::new();
    let user = fx.customer(0);
    let mouse = fx.product("Mouse", ProductCategory::General, 1000, 5);
    let keyboard = fx.product("Keyboard", ProductCategory::General, 2000, 10);
    let mut rx = fx.events.subscribe();

    let req = CheckoutRequest {
        items: vec![
            CartLine { product_id: mouse.id, quantity: 1 },
            CartLine { product_id: keyboard.id, quantity: 1 },
        ],
        payment_method: PaymentMethod::CashOnDelivery,
        delivery: delivery(),
        transaction_id: None,
        payment_proof: None,
    };
    let receipt = checkout(&fx.store, &fx.storage, &fx.events, &actor(&user), req, None)
        .await
        .unwrap();

    assert_eq!(receipt.orders.len(), 2);
    assert_eq!(receipt.total_price, dec(3000));
    assert_eq!(receipt.points_to_earn, 15);
    assert!(!receipt.replayed);
    assert!(receipt.orders.iter().all(|o| o.status == OrderStatus::Pending));
    assert!(receipt.orders.iter().all(|o| o.payment_proof_path.is_none()));

    // Checkout never touches balances.
    assert!(fx.store.ledger_entries(user.id, BalanceKind::Wallet).is_empty());

    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind, OrderEventKind::Inserted);
    assert_eq!(first.product_name.as_deref(), Some("Mouse"));
}

#[tokio::test]
async fn electronic_checkout_stores_proof_and_replays_by_key() {
    let fx = Fixture::new();
    let user = fx.customer(0);
    let ram = fx.product("RAM 16GB", ProductCategory::General, 45000, 40);

    let req = || CheckoutRequest {
        items: vec![CartLine { product_id: ram.id, quantity: 2 }],
        payment_method: PaymentMethod::KbzPay,
        delivery: delivery(),
        transaction_id: Some("ref: 1234-5678".into()),
        payment_proof: Some(Upload {
            content_type: "image/png".into(),
            data: b"fake png".to_vec(),
        }),
    };

    let first = checkout(&fx.store, &fx.storage, &fx.events, &actor(&user), req(), Some("cart-1"))
        .await
        .unwrap();
    let order = &first.orders[0];
    assert_eq!(order.price, dec(90000));
    assert_eq!(order.transaction_id.as_deref(), Some("123456"));
    let proof = order.payment_proof_path.clone().unwrap();
    assert!(proof.starts_with(&user.id.to_string()));
    assert!(fx.dir.path().join("payment-proofs").join(&proof).exists());

    let again = checkout(&fx.store, &fx.storage, &fx.events, &actor(&user), req(), Some("cart-1"))
        .await
        .unwrap();
    assert!(again.replayed);
    assert_eq!(again.orders[0].id, order.id);
    assert_eq!(fx.store.orders().len(), 1);

    // The replay's own upload was discarded; only the original proof remains.
    let stored = std::fs::read_dir(fx.dir.path().join("payment-proofs").join(user.id.to_string()))
        .unwrap()
        .count();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn checkout_rejects_bad_transaction_ids_before_writing() {
    let fx = Fixture::new();
    let user = fx.customer(0);
    let ram = fx.product("RAM", ProductCategory::General, 100, 0);

    let req = CheckoutRequest {
        items: vec![CartLine { product_id: ram.id, quantity: 1 }],
        payment_method: PaymentMethod::WavePay,
        delivery: delivery(),
        transaction_id: Some("12a3".into()),
        payment_proof: Some(Upload {
            content_type: "image/jpeg".into(),
            data: vec![1, 2, 3],
        }),
    };
    let err = checkout(&fx.store, &fx.storage, &fx.events, &actor(&user), req, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransactionId));
    assert!(fx.store.orders().is_empty());
    assert!(!fx.dir.path().join("payment-proofs").exists());
}

#[tokio::test]
async fn quick_buy_with_insufficient_wallet_writes_nothing() {
    let fx = Fixture::new();
    let user = fx.customer(500);
    let diamonds = fx.product("MLBB 86 Diamonds", ProductCategory::Mlbb, 1000, 10);

    let err = quick_buy(&fx.store, &fx.events, &actor(&user), topup(diamonds.id), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InsufficientBalance { .. }));
    assert!(fx.store.orders().is_empty());
    assert!(fx.store.ledger_entries(user.id, BalanceKind::Wallet).is_empty());
    assert_eq!(fx.store.profile(user.id).unwrap().wallet_balance, dec(500));
}

#[tokio::test]
async fn quick_buy_debits_once_per_idempotency_key() {
    let fx = Fixture::new();
    let user = fx.customer(5000);
    let diamonds = fx.product("MLBB 86 Diamonds", ProductCategory::Mlbb, 1500, 10);

    let first = quick_buy(&fx.store, &fx.events, &actor(&user), topup(diamonds.id), Some("k1"))
        .await
        .unwrap();
    assert_eq!(first.balance_after, dec(3500));
    assert_eq!(first.order.payment_method, PaymentMethod::Wallet);

    let replay = quick_buy(&fx.store, &fx.events, &actor(&user), topup(diamonds.id), Some("k1"))
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.order.id, first.order.id);
    assert_eq!(replay.balance_after, dec(3500));

    let entries = fx.store.ledger_entries(user.id, BalanceKind::Wallet);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, dec(-1500));
    assert_eq!(entries[0].order_id, Some(first.order.id));
    assert_eq!(
        entries[0].description.as_deref(),
        Some("Purchase: MLBB 86 Diamonds x1")
    );
}

#[tokio::test]
async fn quick_buy_enforces_policy_and_delivery_rules() {
    let fx = Fixture::new();
    let user = fx.customer(10_000);
    let mut vip = fx.product("VIP Pass", ProductCategory::Pubg, 100, 0);
    vip.is_premium = true;
    fx.store.insert_product(vip.clone());

    let err = quick_buy(&fx.store, &fx.events, &actor(&user), topup(vip.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(ref m) if m == "premium membership required"));

    let premium = fx.premium_customer(10_000);
    assert_ok!(quick_buy(&fx.store, &fx.events, &actor(&premium), topup(vip.id), None).await);

    let data = fx.product("Mytel 1GB", ProductCategory::DataPlan, 1000, 0);
    let mut req = topup(data.id);
    req.delivery = DeliveryInfo::default();
    assert_err!(quick_buy(&fx.store, &fx.events, &actor(&premium), req, None).await);
}

#[tokio::test]
async fn finishing_twice_awards_points_once() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let user = fx.customer(5000);
    let diamonds = fx.product("PUBG 60 UC", ProductCategory::Pubg, 1200, 12);

    let bought = quick_buy(&fx.store, &fx.events, &actor(&user), topup(diamonds.id), None)
        .await
        .unwrap();

    let done = transition(
        &fx.store,
        &fx.events,
        &actor(&admin),
        bought.order.id,
        OrderStatus::Finished,
        true,
    )
    .await
    .unwrap();
    assert_eq!(done.points_awarded, Some(12));
    assert_eq!(done.previous, OrderStatus::Pending);

    let again = transition(
        &fx.store,
        &fx.events,
        &actor(&admin),
        bought.order.id,
        OrderStatus::Finished,
        true,
    )
    .await
    .unwrap_err();
    assert!(matches!(again, ServiceError::InvalidTransition { .. }));

    assert_eq!(fx.store.profile(user.id).unwrap().points, 12);
    let rewards = fx.store.ledger_entries(user.id, BalanceKind::Points);
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].transaction_type, LedgerType::OrderReward);
}

#[tokio::test]
async fn terminal_transitions_need_confirmation_and_admin() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let user = fx.customer(5000);
    let p = fx.product("Free Fire 100", ProductCategory::FreeFire, 1000, 0);
    let bought = quick_buy(&fx.store, &fx.events, &actor(&user), topup(p.id), None)
        .await
        .unwrap();

    let err = transition(&fx.store, &fx.events, &actor(&admin), bought.order.id, OrderStatus::Rejected, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ConfirmationRequired(OrderStatus::Rejected)));

    let err = transition(&fx.store, &fx.events, &actor(&user), bought.order.id, OrderStatus::Approved, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let approved = transition(&fx.store, &fx.events, &actor(&admin), bought.order.id, OrderStatus::Approved, false)
        .await
        .unwrap();
    assert_eq!(approved.order.status, OrderStatus::Approved);
}

#[tokio::test]
async fn rejecting_a_wallet_order_refunds_it() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let user = fx.customer(3000);
    let p = fx.product("MLBB Weekly Pass", ProductCategory::Mlbb, 2000, 0);

    let bought = quick_buy(&fx.store, &fx.events, &actor(&user), topup(p.id), None)
        .await
        .unwrap();
    assert_eq!(fx.store.profile(user.id).unwrap().wallet_balance, dec(1000));

    let rejected = transition(&fx.store, &fx.events, &actor(&admin), bought.order.id, OrderStatus::Rejected, true)
        .await
        .unwrap();
    assert_eq!(rejected.refunded, Some(dec(2000)));
    assert_eq!(fx.store.profile(user.id).unwrap().wallet_balance, dec(3000));

    let entries = fx.store.ledger_entries(user.id, BalanceKind::Wallet);
    assert_eq!(ledger::net_change(&entries), dec(0));
    assert_eq!(entries.last().unwrap().transaction_type, LedgerType::Refund);
}

#[tokio::test]
async fn bulk_transition_reports_each_order() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let user = fx.customer(10_000);
    let p = fx.product("PUBG 325 UC", ProductCategory::Pubg, 1000, 3);

    let a = quick_buy(&fx.store, &fx.events, &actor(&user), topup(p.id), None).await.unwrap();
    let b = quick_buy(&fx.store, &fx.events, &actor(&user), topup(p.id), None).await.unwrap();
    transition(&fx.store, &fx.events, &actor(&admin), b.order.id, OrderStatus::Cancelled, true)
        .await
        .unwrap();
    let missing = Uuid::new_v4();

    let outcome = bulk_transition(
        &fx.store,
        &fx.events,
        &actor(&admin),
        &[a.order.id, b.order.id, missing, a.order.id],
        OrderStatus::Finished,
        true,
    )
    .await
    .unwrap();

    assert_eq!(outcome.updated, vec![a.order.id]);
    assert_eq!(outcome.points_awarded, 3);
    assert_eq!(outcome.skipped.len(), 2);
    assert_eq!(outcome.skipped[0].order_id, b.order.id);
    assert_eq!(outcome.skipped[0].code, "INVALID_TRANSITION");
    assert_eq!(outcome.skipped[1].code, "NOT_FOUND");

    let empty = bulk_transition(&fx.store, &fx.events, &actor(&admin), &[], OrderStatus::Approved, false).await;
    assert!(matches!(empty, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn listing_twice_without_writes_is_identical() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let user = fx.customer(10_000);
    let p = fx.product("Gift Card", ProductCategory::General, 100, 0);
    for _ in 0..5 {
        quick_buy(&fx.store, &fx.events, &actor(&user), topup(p.id), None).await.unwrap();
    }

    let page = Page::new(1, 3);
    let first = orders::list_own(&fx.store, &actor(&user), page).await.unwrap();
    let second = orders::list_own(&fx.store, &actor(&user), page).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.1, 5);
    assert_eq!(first.0.len(), 3);
    assert!(first.0.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let filter = kaung_commerce::types::OrderFilter {
        status: Some(OrderStatus::Finished),
        ..Default::default()
    };
    let (finished, total) = orders::list_all(&fx.store, &actor(&admin), &filter, Page::default())
        .await
        .unwrap();
    assert!(finished.is_empty());
    assert_eq!(total, 0);

    assert!(matches!(
        orders::list_all(&fx.store, &actor(&user), &filter, Page::default()).await,
        Err(ServiceError::Forbidden(_))
    ));
}

#[tokio::test]
async fn other_users_cannot_view_an_order() {
    let fx = Fixture::new();
    let owner = fx.customer(1000);
    let stranger = fx.customer(0);
    let p = fx.product("Gift Card", ProductCategory::General, 100, 0);
    let bought = quick_buy(&fx.store, &fx.events, &actor(&owner), topup(p.id), None)
        .await
        .unwrap();

    assert_ok!(orders::get(&fx.store, &actor(&owner), bought.order.id).await);
    assert!(matches!(
        orders::get(&fx.store, &actor(&stranger), bought.order.id).await,
        Err(ServiceError::Forbidden(_))
    ));
    assert!(matches!(
        fx.store.get_order(Uuid::new_v4()).await,
        Ok(None)
    ));
}

#[tokio::test]
async fn wallet_ledger_accounts_for_every_balance_change() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let user = fx.customer(1000);
    let initial = dec(1000);
    let p = fx.product("MLBB Starlight", ProductCategory::Mlbb, 700, 0);

    let deposit = deposits::submit(
        &fx.store,
        &fx.storage,
        &actor(&user),
        DepositRequest {
            amount: dec(5000),
            payment_method: PaymentMethod::KbzPay,
            transaction_id: "246810".into(),
            screenshot: Upload {
                content_type: "image/jpeg".into(),
                data: vec![0xff, 0xd8, 0xff],
            },
        },
    )
    .await
    .unwrap();
    assert_eq!(fx.store.profile(user.id).unwrap().wallet_balance, initial);

    let approved = deposits::resolve(&fx.store, &actor(&admin), deposit.id, true)
        .await
        .unwrap();
    assert_eq!(approved.balance_after, Some(dec(6000)));
    assert!(matches!(
        deposits::resolve(&fx.store, &actor(&admin), deposit.id, false).await,
        Err(ServiceError::AlreadyResolved(_))
    ));

    let a = quick_buy(&fx.store, &fx.events, &actor(&user), topup(p.id), None).await.unwrap();
    quick_buy(&fx.store, &fx.events, &actor(&user), topup(p.id), None).await.unwrap();
    transition(&fx.store, &fx.events, &actor(&admin), a.order.id, OrderStatus::Cancelled, true)
        .await
        .unwrap();

    let current = fx.store.profile(user.id).unwrap().wallet_balance;
    assert_eq!(current, dec(5300));
    let entries = fx.store.ledger_entries(user.id, BalanceKind::Wallet);
    assert_eq!(entries.len(), 4);
    assert_eq!(ledger::net_change(&entries), current - initial);
    assert_eq!(entries.last().unwrap().balance_after, current);
}

#[tokio::test]
async fn temporary_ban_stamps_expiry_and_blocks_purchases() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let reporter = fx.customer(0);
    let offender = fx.customer(5000);
    let p = fx.product("Gift Card", ProductCategory::General, 100, 0);

    let report = reports::file_report(
        &fx.store,
        &actor(&reporter),
        ReportRequest {
            reported_user_id: offender.id,
            message_id: None,
            reason: "spam".into(),
            description: Some("  sends links  ".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(report.status, ReportStatus::Pending);
    assert_eq!(report.description.as_deref(), Some("sends links"));

    let before = Utc::now();
    let resolved = reports::process_action(
        &fx.store,
        &actor(&admin),
        report.id,
        ModerationAction::TemporaryBan,
        Duration::hours(72),
    )
    .await
    .unwrap();
    assert_eq!(resolved.report.status, ReportStatus::Actioned);
    assert_eq!(resolved.report.admin_action, Some(ModerationAction::TemporaryBan));

    let banned = fx.store.profile(offender.id).unwrap();
    assert_eq!(banned.account_status, AccountStatus::TemporaryBan);
    let expires = banned.status_expires_at.unwrap();
    assert!(expires >= before + Duration::hours(72));
    assert_eq!(banned.effective_status(expires + Duration::seconds(1)), AccountStatus::Good);

    let err = quick_buy(&fx.store, &fx.events, &actor(&banned), topup(p.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(ref m) if m == "account is suspended"));

    let again = reports::process_action(
        &fx.store,
        &actor(&admin),
        report.id,
        ModerationAction::Dismiss,
        Duration::hours(72),
    )
    .await;
    assert!(matches!(again, Err(ServiceError::AlreadyResolved(_))));
}

fn cod_cart(lines: Vec<CartLine>) -> CheckoutRequest {
    CheckoutRequest {
        items: lines,
        payment_method: PaymentMethod::CashOnDelivery,
        delivery: delivery(),
        transaction_id: None,
        payment_proof: None,
    }
}

#[tokio::test]
async fn repeated_products_in_a_cart_become_one_order() {
    let fx = Fixture::new();
    let user = fx.customer(0);
    let mouse = fx.product("Mouse", ProductCategory::General, 1000, 5);
    let cart = || {
        cod_cart(vec![
            CartLine { product_id: mouse.id, quantity: 1 },
            CartLine { product_id: mouse.id, quantity: 2 },
        ])
    };

    let receipt = checkout(&fx.store, &fx.storage, &fx.events, &actor(&user), cart(), Some("cart-1"))
        .await
        .unwrap();
    assert_eq!(receipt.orders.len(), 1);
    assert_eq!(receipt.orders[0].quantity, 3);
    assert_eq!(receipt.total_price, dec(3000));
    assert_eq!(receipt.points_to_earn, 15);

    let replay = checkout(&fx.store, &fx.storage, &fx.events, &actor(&user), cart(), Some("cart-1"))
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.orders[0].id, receipt.orders[0].id);
    assert_eq!(fx.store.orders().len(), 1);
}

#[tokio::test]
async fn store_refuses_two_lines_of_one_product_under_a_key() {
    let fx = Fixture::new();
    let user = fx.customer(0);
    let mouse = fx.product("Mouse", ProductCategory::General, 1000, 5);
    let line = || NewOrder {
        user_id: user.id,
        product_id: mouse.id,
        quantity: 1,
        price: dec(1000),
        payment_method: PaymentMethod::CashOnDelivery,
        payment_proof_path: None,
        transaction_id: None,
        delivery: delivery(),
        idempotency_key: Some("dup".into()),
    };

    let err = fx
        .store
        .create_orders(user.id, vec![line(), line()], Some("dup"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert!(fx.store.orders().is_empty());
}

#[tokio::test]
async fn idempotency_keys_are_shared_by_checkout_and_quick_buy() {
    let fx = Fixture::new();
    let user = fx.customer(5000);
    let diamonds = fx.product("MLBB 86 Diamonds", ProductCategory::Mlbb, 1500, 0);
    let pass = fx.product("MLBB Weekly Pass", ProductCategory::Mlbb, 2000, 0);
    let mouse = fx.product("Mouse", ProductCategory::General, 1000, 5);
    let buyer = actor(&user);
    let mouse_cart = || cod_cart(vec![CartLine { product_id: mouse.id, quantity: 1 }]);

    assert_ok!(quick_buy(&fx.store, &fx.events, &buyer, topup(diamonds.id), Some("tap")).await);

    let err = checkout(&fx.store, &fx.storage, &fx.events, &buyer, mouse_cart(), Some("tap"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let err = quick_buy(&fx.store, &fx.events, &buyer, topup(pass.id), Some("tap"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    assert_ok!(checkout(&fx.store, &fx.storage, &fx.events, &buyer, mouse_cart(), Some("cart")).await);
    let err = quick_buy(&fx.store, &fx.events, &buyer, topup(diamonds.id), Some("cart"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    assert_eq!(fx.store.orders().len(), 2);
    assert_eq!(fx.store.profile(user.id).unwrap().wallet_balance, dec(3500));
}

#[tokio::test]
async fn dashboard_loaded_after_subscribing_counts_each_order_once() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let user = fx.customer(5000);
    let diamonds = fx.product("MLBB 86 Diamonds", ProductCategory::Mlbb, 1500, 0);

    // The order commits between subscribing and loading the snapshot.
    let mut rx = fx.events.subscribe();
    let bought = quick_buy(&fx.store, &fx.events, &actor(&user), topup(diamonds.id), None)
        .await
        .unwrap();
    let mut view = realtime::load_dashboard(&fx.store, realtime::DEFAULT_CHART_DAYS)
        .await
        .unwrap();
    assert_eq!(view.stats.total, 1);

    view.apply(&rx.recv().await.unwrap());
    assert_eq!(view.stats.total, 1);
    assert_eq!(view.stats.pending, 1);
    assert_eq!(view.daily()[0].orders, 1);

    transition(&fx.store, &fx.events, &actor(&admin), bought.order.id, OrderStatus::Finished, true)
        .await
        .unwrap();
    view.apply(&rx.recv().await.unwrap());
    assert_eq!(view.stats.pending, 0);
    assert_eq!(view.stats.finished, 1);
    assert_eq!(view.stats.revenue, dec(1500));
    assert_eq!(view.daily()[0].revenue, dec(1500));
}
