mod common;

use axum::http::StatusCode;
use common::{decimal_of, GuestPair, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn guest_gets_session_headers_only_on_first_touch() {
    let app = TestApp::new().await;

    let (status, body, headers) = app.get("/api/v1/cart", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
    let pair = GuestPair::from_headers(&headers).expect("fresh session pair");

    // Reusing the validated pair must not re-issue credentials.
    let (status, _, headers) = app.get("/api/v1/cart", &pair.headers()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("x-session-id").is_none());
    assert!(headers.get("x-session-secret").is_none());
}

#[tokio::test]
async fn wrong_secret_is_treated_as_absent_credentials() {
    let app = TestApp::new().await;
    let pair = app.new_guest().await;

    let bad = [
        ("x-session-id", pair.session_id.as_str()),
        ("x-session-secret", "wrong-secret"),
    ];
    let (status, _, headers) = app.get("/api/v1/cart", &bad).await;

    // Not a 401: the caller simply becomes a new guest.
    assert_eq!(status, StatusCode::OK);
    let fresh = GuestPair::from_headers(&headers).expect("new session issued");
    assert_ne!(fresh.session_id, pair.session_id);
}

#[tokio::test]
async fn expired_session_is_rejected_even_with_the_correct_secret() {
    let app = TestApp::new().await;
    let pair = app.seed_guest_session(-1).await;

    // Non-creating paths refuse the stale pair outright, exactly as they
    // would an unknown one.
    let (status, body, _) = app.delete("/api/v1/cart", &pair.headers()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    // Cart reads fall back to a brand-new guest instead.
    let (status, _, headers) = app.get("/api/v1/cart", &pair.headers()).await;
    assert_eq!(status, StatusCode::OK);
    let fresh = GuestPair::from_headers(&headers).expect("new session issued");
    assert_ne!(fresh.session_id, pair.session_id);
}

#[tokio::test]
async fn adding_same_product_twice_folds_into_one_line() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Mug", dec!(5.00), 10).await;
    let pair = app.new_guest().await;

    let (status, _, _) = app
        .post(
            "/api/v1/cart/items",
            json!({"product_id": product_id, "quantity": 2}),
            &pair.headers(),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body, _) = app
        .post(
            "/api/v1/cart/items",
            json!({"product_id": product_id, "quantity": 3}),
            &pair.headers(),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 5);
    assert_eq!(decimal_of(&body["subtotal"]), dec!(25.00));
}

#[tokio::test]
async fn add_item_rejects_insufficient_stock_with_details() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Lamp", dec!(30.00), 2).await;
    let pair = app.new_guest().await;

    // 2 in cart, asking for 1 more exceeds the 2 in stock.
    let (status, _, _) = app
        .post(
            "/api/v1/cart/items",
            json!({"product_id": product_id, "quantity": 2}),
            &pair.headers(),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body, _) = app
        .post(
            "/api/v1/cart/items",
            json!({"product_id": product_id, "quantity": 1}),
            &pair.headers(),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INSUFFICIENT_STOCK");
    assert_eq!(body["details"]["available_stock"], 2);
    assert_eq!(body["details"]["requested"], 3);
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let app = TestApp::new().await;
    let pair = app.new_guest().await;

    let (status, body, _) = app
        .post(
            "/api/v1/cart/items",
            json!({"product_id": Uuid::new_v4(), "quantity": 1}),
            &pair.headers(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn updating_quantity_to_zero_removes_the_line() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Pen", dec!(2.50), 100).await;
    let pair = app.new_guest().await;

    let (_, body, _) = app
        .post(
            "/api/v1/cart/items",
            json!({"product_id": product_id, "quantity": 4}),
            &pair.headers(),
        )
        .await;
    let item_id = body["items"][0]["item_id"].as_str().unwrap().to_string();

    let (status, body, _) = app
        .put(
            &format!("/api/v1/cart/items/{}", item_id),
            json!({"quantity": 1}),
            &pair.headers(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["quantity"], 1);

    let (status, body, _) = app
        .put(
            &format!("/api/v1/cart/items/{}", item_id),
            json!({"quantity": 0}),
            &pair.headers(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn clearing_the_cart_keeps_the_cart_itself() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Desk", dec!(120.00), 5).await;
    let pair = app.new_guest().await;

    app.post(
        "/api/v1/cart/items",
        json!({"product_id": product_id, "quantity": 1}),
        &pair.headers(),
    )
    .await;

    let (status, _, _) = app.delete("/api/v1/cart", &pair.headers()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body, headers) = app.get("/api/v1/cart", &pair.headers()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
    assert_eq!(decimal_of(&body["subtotal"]), dec!(0));
    // Same session, no fresh credentials.
    assert!(headers.get("x-session-id").is_none());
}

#[tokio::test]
async fn mutation_without_identity_is_unauthorized() {
    let app = TestApp::new().await;

    // No headers and no token on a non-creating path.
    let (status, body, _) = app
        .put(
            &format!("/api/v1/cart/items/{}", Uuid::new_v4()),
            json!({"quantity": 1}),
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}
