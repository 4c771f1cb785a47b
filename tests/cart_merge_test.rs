mod common;

use axum::http::StatusCode;
use common::{GuestPair, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use storefront_api::entities::PromoUsage;
use uuid::Uuid;

fn auth_header(token: &str) -> (String, String) {
    ("authorization".to_string(), format!("Bearer {}", token))
}

async fn add(app: &TestApp, headers: &[(&str, &str)], product_id: Uuid, quantity: i32) {
    let (status, _, _) = app
        .post(
            "/api/v1/cart/items",
            json!({"product_id": product_id, "quantity": quantity}),
            headers,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn guest_cart_is_claimed_when_user_has_none() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Bottle", dec!(9.00), 50).await;
    let pair = app.new_guest().await;
    add(&app, &pair.headers(), product_id, 2).await;

    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id, &["customer"]);
    let auth = auth_header(&token);
    let combined = [
        ("authorization", auth.1.as_str()),
        ("x-session-id", pair.session_id.as_str()),
        ("x-session-secret", pair.secret.as_str()),
    ];

    let (status, body, _) = app.get("/api/v1/cart", &combined).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 2);

    // The cart now belongs to the user alone.
    let user_only = [("authorization", auth.1.as_str())];
    let (status, body, _) = app.get("/api/v1/cart", &user_only).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn merge_sums_shared_lines_and_moves_novel_ones() {
    let app = TestApp::new().await;
    let product_a = app.seed_product("Alpha", dec!(5.00), 100).await;
    let product_b = app.seed_product("Beta", dec!(6.00), 100).await;

    // User cart: {A:2, B:1}
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id, &["customer"]);
    let auth = auth_header(&token);
    let user_only = [("authorization", auth.1.as_str())];
    add(&app, &user_only, product_a, 2).await;
    add(&app, &user_only, product_b, 1).await;

    // Guest cart: {A:1}
    let pair = app.new_guest().await;
    add(&app, &pair.headers(), product_a, 1).await;

    // Login-time fetch with both identities merges: {A:3, B:1}
    let combined = [
        ("authorization", auth.1.as_str()),
        ("x-session-id", pair.session_id.as_str()),
        ("x-session-secret", pair.secret.as_str()),
    ];
    let (status, body, _) = app.get("/api/v1/cart", &combined).await;
    assert_eq!(status, StatusCode::OK);

    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    let quantity_of = |pid: Uuid| {
        items
            .iter()
            .find(|i| i["product_id"] == json!(pid))
            .map(|i| i["quantity"].as_i64().unwrap())
            .unwrap()
    };
    assert_eq!(quantity_of(product_a), 3);
    assert_eq!(quantity_of(product_b), 1);
}

#[tokio::test]
async fn session_is_rotated_after_merge() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Gamma", dec!(3.00), 10).await;
    let pair = app.new_guest().await;
    add(&app, &pair.headers(), product_id, 1).await;

    let token = app.token_for(Uuid::new_v4(), &["customer"]);
    let auth = auth_header(&token);
    let combined = [
        ("authorization", auth.1.as_str()),
        ("x-session-id", pair.session_id.as_str()),
        ("x-session-secret", pair.secret.as_str()),
    ];
    let (status, _, _) = app.get("/api/v1/cart", &combined).await;
    assert_eq!(status, StatusCode::OK);

    // The old pair must no longer resolve: the server treats it as absent
    // and issues a brand new session with an empty cart.
    let (status, body, headers) = app.get("/api/v1/cart", &pair.headers()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
    let fresh = GuestPair::from_headers(&headers).expect("new session issued");
    assert_ne!(fresh.session_id, pair.session_id);
}

#[tokio::test]
async fn merge_discards_the_guest_carts_promo_usage() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Epsilon", dec!(10.00), 20).await;
    app.seed_promo("SAVE10", dec!(10.00), 30).await;

    // Both sides have a cart, so the guest cart gets merged and deleted.
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id, &["customer"]);
    let auth = auth_header(&token);
    let user_only = [("authorization", auth.1.as_str())];
    add(&app, &user_only, product_id, 1).await;

    let pair = app.new_guest().await;
    add(&app, &pair.headers(), product_id, 1).await;
    let (status, _, _) = app
        .post(
            "/api/v1/cart/promo",
            json!({"code": "SAVE10"}),
            &pair.headers(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let combined = [
        ("authorization", auth.1.as_str()),
        ("x-session-id", pair.session_id.as_str()),
        ("x-session-secret", pair.secret.as_str()),
    ];
    let (status, body, _) = app.get("/api/v1/cart", &combined).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["quantity"], 2);
    // The promo belonged to the deleted cart; the merged cart starts clean.
    assert_eq!(body["promo_code"], serde_json::Value::Null);

    // No usage row may survive the deleted cart.
    let usages = PromoUsage::find()
        .all(app.state.db.as_ref())
        .await
        .expect("failed to list promo usages");
    assert!(usages.is_empty());

    // The code is free to be applied to the merged cart.
    let (status, _, _) = app
        .post("/api/v1/cart/promo", json!({"code": "SAVE10"}), &user_only)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn merge_is_idempotent_once_session_is_gone() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Delta", dec!(4.00), 10).await;
    let pair = app.new_guest().await;
    add(&app, &pair.headers(), product_id, 2).await;

    let token = app.token_for(Uuid::new_v4(), &["customer"]);
    let auth = auth_header(&token);
    let combined = [
        ("authorization", auth.1.as_str()),
        ("x-session-id", pair.session_id.as_str()),
        ("x-session-secret", pair.secret.as_str()),
    ];

    let (_, body, _) = app.get("/api/v1/cart", &combined).await;
    assert_eq!(body["items"][0]["quantity"], 2);

    // Replaying the same request cannot double the quantities: the session
    // no longer validates, so no second merge happens.
    let (_, body, _) = app.get("/api/v1/cart", &combined).await;
    assert_eq!(body["items"][0]["quantity"], 2);
}
