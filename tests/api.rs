mod common;

use std::time::Duration;

use axum::{
    Router,
    body::{Body, BodyDataStream, to_bytes},
    http::{Request, StatusCode, header},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use common::Fixture;
use futures::StreamExt;
use kaung_commerce::init_router;
use kaung_commerce::preferences::{self, AdminSoundEnabled};
use kaung_commerce::types::{Product, ProductCategory, Profile};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(fx: &Fixture) -> Router {
    init_router(fx.state())
}

fn get(uri: &str, user: Option<&Profile>) -> Request<Body> {
    let mut req = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        req = req.header("x-user-id", user.id.to_string());
    }
    req.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, user: &Profile, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-user-id", user.id.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_is_public() {
    let fx = Fixture::new();
    let res = app(&fx).oneshot(get("/health", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn requests_without_a_known_user_are_unauthorized() {
    let fx = Fixture::new();
    let app = app(&fx);

    let (status, body) = send(&app, get("/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
    assert!(body["request_id"].is_string());

    let ghost = Profile::new(uuid::Uuid::new_v4(), "Ghost");
    let (status, _) = send(&app, get("/me", Some(&ghost))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_returns_the_callers_profile() {
    let fx = Fixture::new();
    let user = fx.customer(2500);

    let (status, body) = send(&app(&fx), get("/me", Some(&user))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], user.id.to_string());
    assert_eq!(body["data"]["display_name"], "Aung Aung");
    assert!(body["meta"]["request_id"].is_string());
}

#[tokio::test]
async fn cod_checkout_is_created() {
    let fx = Fixture::new();
    let user = fx.customer(0);
    let product = fx.product("SSD 512GB", ProductCategory::General, 85000, 80);

    let (status, body) = send(
        &app(&fx),
        post_json(
            "/checkout",
            &user,
            json!({
                "items": [{ "product_id": product.id, "quantity": 1 }],
                "payment_method": "cod",
                "customer_name": "Aung Aung",
                "phone": "09123456789",
                "address": "Yangon",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["orders"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["points_to_earn"], 80);
    assert_eq!(body["data"]["orders"][0]["status"], "pending");
}

#[tokio::test]
async fn quick_buy_without_funds_is_a_bad_request() {
    let fx = Fixture::new();
    let user = fx.customer(500);
    let product = fx.product("MLBB 172 Diamonds", ProductCategory::Mlbb, 1000, 0);

    let (status, body) = send(
        &app(&fx),
        post_json(
            "/quick-buy",
            &user,
            json!({
                "product_id": product.id,
                "player_id": "12345678",
                "server_id": "2101",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");
    assert!(fx.store.orders().is_empty());
}

#[tokio::test]
async fn quick_buy_replay_returns_ok_instead_of_created() {
    let fx = Fixture::new();
    let user = fx.customer(5000);
    let product = fx.product("PUBG 60 UC", ProductCategory::Pubg, 1200, 0);
    let app = app(&fx);
    let req = || {
        let mut req = post_json(
            "/quick-buy",
            &user,
            json!({ "product_id": product.id, "player_id": "5123456789" }),
        );
        req.headers_mut()
            .insert("idempotency-key", "tap-1".parse().unwrap());
        req
    };

    let (first, _) = send(&app, req()).await;
    let (second, body) = send(&app, req()).await;
    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["data"]["replayed"], true);
    assert_eq!(fx.store.orders().len(), 1);
}

#[tokio::test]
async fn admin_routes_reject_customers() {
    let fx = Fixture::new();
    let user = fx.customer(0);
    let app = app(&fx);

    for uri in ["/admin/orders", "/admin/stats", "/admin/reports", "/admin/deposits"] {
        let (status, body) = send(&app, get(uri, Some(&user))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["code"], "FORBIDDEN");
    }

    let admin = fx.admin();
    let (status, body) = send(&app, get("/admin/stats", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stats"]["total"], 0);
}

#[tokio::test]
async fn terminal_status_change_without_confirmation_is_refused() {
    let fx = Fixture::new();
    let admin = fx.admin();
    let user = fx.customer(5000);
    let product = fx.product("Free Fire 520", ProductCategory::FreeFire, 2000, 0);
    let app = app(&fx);

    let (_, bought) = send(
        &app,
        post_json(
            "/quick-buy",
            &user,
            json!({ "product_id": product.id, "player_id": "998877" }),
        ),
    )
    .await;
    let order_id = bought["data"]["order"]["id"].as_str().unwrap().to_string();
    let uri = format!("/admin/orders/{order_id}/status");

    let (status, body) = send(&app, post_json(&uri, &admin, json!({ "status": "rejected" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONFIRMATION_REQUIRED");

    let (status, body) = send(
        &app,
        post_json(&uri, &admin, json!({ "status": "rejected", "confirm": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["order"]["status"], "rejected");
    assert_eq!(
        fx.store.profile(user.id).unwrap().wallet_balance,
        common::dec(5000)
    );
}

#[tokio::test]
async fn payment_proof_links_are_signed() {
    let fx = Fixture::new();
    let user = fx.customer(0);
    let product = fx.product("Graphics Card", ProductCategory::General, 900000, 900);
    let app = app(&fx);
    let proof = b"\x89PNG proof";

    let (status, body) = send(
        &app,
        post_json(
            "/checkout",
            &user,
            json!({
                "items": [{ "product_id": product.id, "quantity": 1 }],
                "payment_method": "kpay",
                "phone": "09123456789",
                "address": "Mandalay",
                "transaction_id": "987654",
                "payment_proof": { "content_type": "image/png", "data": STANDARD.encode(proof) },
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = body["data"]["orders"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/orders/{order_id}/proof"), Some(&user))).await;
    assert_eq!(status, StatusCode::OK);
    let url = body["data"]["url"].as_str().unwrap();
    let uri = url
        .strip_prefix(&fx.config.public_base_url)
        .unwrap()
        .to_string();

    let res = app.clone().oneshot(get(&uri, None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], proof);

    let (path, _) = uri.split_once("&sig=").unwrap();
    let forged = format!("{path}&sig={}", "0".repeat(64));
    let (status, body) = send(&app, get(&forged, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "BAD_SIGNATURE");

    let unsigned = uri.split_once('?').unwrap().0;
    let (status, _) = send(&app, get(unsigned, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

/// Reads named server-sent events off a streaming response body.
struct EventReader {
    body: BodyDataStream,
    buf: String,
}

impl EventReader {
    async fn open(app: &Router, admin: &Profile) -> Self {
        let res = app
            .clone()
            .oneshot(get("/admin/orders/events", Some(admin)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        Self {
            body: res.into_body().into_data_stream(),
            buf: String::new(),
        }
    }

    async fn next(&mut self) -> (String, Value) {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let frame: String = self.buf.drain(..end + 2).collect();
                let mut name = String::new();
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        name = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push_str(v.trim_start());
                    }
                }
                if data.is_empty() {
                    continue;
                }
                return (name, serde_json::from_str(&data).unwrap());
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await
                .expect("no event within 5s")
                .expect("event stream ended")
                .unwrap();
            self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}

async fn wallet_order(app: &Router, user: &Profile, product: &Product) {
    let (status, _) = send(
        app,
        post_json(
            "/quick-buy",
            user,
            json!({ "product_id": product.id, "player_id": "5123456789" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn order_feed_sends_snapshot_then_orders_with_sound_preference() {
    let fx = Fixture::new();
    let loud = fx.admin();
    let quiet = fx.admin();
    preferences::set::<AdminSoundEnabled>(&fx.store, quiet.id, false)
        .await
        .unwrap();
    let user = fx.customer(5000);
    let product = fx.product("PUBG 60 UC", ProductCategory::Pubg, 1200, 0);
    let app = app(&fx);

    let mut loud_feed = EventReader::open(&app, &loud).await;
    let mut quiet_feed = EventReader::open(&app, &quiet).await;
    for feed in [&mut loud_feed, &mut quiet_feed] {
        let (name, snapshot) = feed.next().await;
        assert_eq!(name, "snapshot");
        assert_eq!(snapshot["stats"]["total"], 0);
    }

    wallet_order(&app, &user, &product).await;

    let (name, update) = loud_feed.next().await;
    assert_eq!(name, "order");
    assert_eq!(update["event"]["kind"], "inserted");
    assert_eq!(update["event"]["product_name"], "PUBG 60 UC");
    assert_eq!(update["play_cue"], true);
    assert_eq!(update["dashboard"]["stats"]["total"], 1);
    assert_eq!(update["dashboard"]["stats"]["pending"], 1);

    let (name, update) = quiet_feed.next().await;
    assert_eq!(name, "order");
    assert_eq!(update["play_cue"], false);
    assert_eq!(update["dashboard"]["stats"]["total"], 1);
}

#[tokio::test]
async fn lagging_order_feed_resyncs_without_double_counting() {
    let mut fx = Fixture::new();
    fx.config.event_buffer = 1;
    let admin = fx.admin();
    let user = fx.customer(5000);
    let product = fx.product("Free Fire 100", ProductCategory::FreeFire, 1000, 0);
    let app = app(&fx);

    let mut feed = EventReader::open(&app, &admin).await;
    assert_eq!(feed.next().await.0, "snapshot");

    for _ in 0..3 {
        wallet_order(&app, &user, &product).await;
    }

    let (name, resync) = feed.next().await;
    assert_eq!(name, "resync");
    assert_eq!(resync["missed"], 2);
    assert_eq!(resync["dashboard"]["stats"]["total"], 3);

    // The one event still buffered is already part of the reloaded dashboard.
    let (name, update) = feed.next().await;
    assert_eq!(name, "order");
    assert_eq!(update["dashboard"]["stats"]["total"], 3);
    assert_eq!(update["dashboard"]["stats"]["pending"], 3);
}
