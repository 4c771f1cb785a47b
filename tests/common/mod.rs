use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::Claims,
    config::AppConfig,
    db,
    auth::guest,
    entities::{guest_session, payment_method, product, promo_code},
    events::{self, EventSender},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Parses a JSON field that may serialize a decimal as string or number.
pub fn decimal_of(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("invalid decimal string"),
        Value::Number(n) => n.to_string().parse().expect("invalid decimal number"),
        other => panic!("expected decimal, got {:?}", other),
    }
}

/// Guest credential pair captured from response headers.
#[derive(Debug, Clone)]
pub struct GuestPair {
    pub session_id: String,
    pub secret: String,
}

impl GuestPair {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Some(Self {
            session_id: headers.get("x-session-id")?.to_str().ok()?.to_string(),
            secret: headers.get("x-session-secret")?.to_str().ok()?.to_string(),
        })
    }

    /// Header slice for request helpers.
    pub fn headers(&self) -> [(&str, &str); 2] {
        [
            ("x-session-id", self.session_id.as_str()),
            ("x-session-secret", self.secret.as_str()),
        ]
    }
}

/// Harness spinning up the full router over an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // A single connection keeps every query on the same in-memory
        // database instance.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), Arc::new(cfg), event_sender);
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Mints a bearer token for a user, signed with the test secret.
    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
            iss: "storefront-api".to_string(),
            aud: "storefront-clients".to_string(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("failed to mint test token")
    }

    /// Sends a request and returns (status, parsed JSON body, headers).
    /// `extra_headers` carries bearer tokens and guest session pairs.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        extra_headers: &[(&str, &str)],
    ) -> (StatusCode, Value, HeaderMap) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to read body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, json, headers)
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, Value, HeaderMap) {
        self.request(Method::GET, uri, None, headers).await
    }

    pub async fn post(
        &self,
        uri: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value, HeaderMap) {
        self.request(Method::POST, uri, Some(body), headers).await
    }

    pub async fn put(
        &self,
        uri: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value, HeaderMap) {
        self.request(Method::PUT, uri, Some(body), headers).await
    }

    pub async fn patch(
        &self,
        uri: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value, HeaderMap) {
        self.request(Method::PATCH, uri, Some(body), headers).await
    }

    pub async fn delete(
        &self,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value, HeaderMap) {
        self.request(Method::DELETE, uri, None, headers).await
    }

    /// Inserts a product directly into the catalog.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            stock_quantity: Set(stock),
            category: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed product");
        id
    }

    /// Inserts a promo code expiring `days_from_now` days out (negative for
    /// an already-expired code).
    pub async fn seed_promo(&self, code: &str, percentage: Decimal, days_from_now: i64) -> Uuid {
        let id = Uuid::new_v4();
        promo_code::ActiveModel {
            id: Set(id),
            code: Set(code.to_string()),
            discount_percentage: Set(percentage),
            expires_at: Set(Utc::now() + Duration::days(days_from_now)),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed promo code");
        id
    }

    pub async fn seed_payment_method(&self, name: &str, active: bool) -> Uuid {
        let id = Uuid::new_v4();
        payment_method::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            active: Set(active),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed payment method");
        id
    }

    /// Inserts a guest session row directly, expiring `days_from_now` days
    /// out (negative for an already-expired session). Returns the pair a
    /// client holding that session would present.
    pub async fn seed_guest_session(&self, days_from_now: i64) -> GuestPair {
        let id = Uuid::new_v4();
        let secret = guest::generate_secret();
        let now = Utc::now();
        guest_session::ActiveModel {
            id: Set(id),
            secret: Set(secret.clone()),
            created_at: Set(now),
            last_seen_at: Set(now),
            expires_at: Set(now + Duration::days(days_from_now)),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("failed to seed guest session");
        GuestPair {
            session_id: id.to_string(),
            secret,
        }
    }

    /// Issues a guest session by touching the cart endpoint and capturing
    /// the credential pair from the response headers.
    pub async fn new_guest(&self) -> GuestPair {
        let (status, _, headers) = self.get("/api/v1/cart", &[]).await;
        assert_eq!(status, StatusCode::OK);
        GuestPair::from_headers(&headers).expect("expected fresh session headers")
    }
}
