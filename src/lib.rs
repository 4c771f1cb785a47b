pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;

use auth::AuthService;
use config::AppConfig;
use events::EventSender;
use services::{
    CartService, CheckoutService, IdentityService, InventoryService, OrderService,
    OrderStatusService, ProductService, PromotionService,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub services: AppServices,
}

/// The service graph behind the HTTP surface. Everything is cheaply
/// cloneable so the state can be handed to every request.
#[derive(Clone)]
pub struct AppServices {
    pub products: ProductService,
    pub identity: Arc<IdentityService>,
    pub carts: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub promotions: Arc<PromotionService>,
    pub order_status: Arc<OrderStatusService>,
    pub checkout: Arc<CheckoutService>,
}

impl AppServices {
    pub fn build(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        let inventory = InventoryService::new();
        let identity = Arc::new(IdentityService::new(
            db.clone(),
            event_sender.clone(),
            config.guest_session_ttl_days,
        ));
        let promotions = Arc::new(PromotionService::new(db.clone(), event_sender.clone()));
        let carts = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            identity.clone(),
            inventory.clone(),
            promotions.clone(),
        ));
        let orders = Arc::new(OrderService::new(db.clone(), identity.clone(), carts.clone()));
        let order_status = Arc::new(OrderStatusService::new(db.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender,
            config,
            carts.clone(),
            orders.clone(),
            promotions.clone(),
            inventory.clone(),
            order_status.clone(),
        ));

        Self {
            products: ProductService::new(db),
            identity,
            carts,
            orders,
            promotions,
            order_status,
            checkout,
        }
    }
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(auth::AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
            jwt_issuer: config.auth_issuer.clone(),
            jwt_audience: config.auth_audience.clone(),
        }));
        let services = AppServices::build(db.clone(), event_sender, config.clone());

        Self {
            db,
            config,
            auth,
            services,
        }
    }
}

/// Versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/products", handlers::products::product_routes())
        .nest(
            "/payment-methods",
            handlers::products::payment_method_routes(),
        )
        .nest("/cart", handlers::carts::cart_routes())
        .nest("/checkout", handlers::orders::checkout_routes())
        .nest("/orders", handlers::orders::order_routes())
}

/// Full application router: versioned API plus the health endpoint.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    Json(json!({
        "status": db_status,
        "database": db_status,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
