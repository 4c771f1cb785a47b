use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    auth::{guest::GuestCredentials, AuthUser, OptionalAuthUser},
    entities::order::OrderStatus,
    errors::ServiceError,
    services::{
        checkout::{CheckoutRequest, PayRequest},
        identity::ResolvedIdentity,
    },
    AppState,
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for order endpoints
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/my", get(list_my_orders))
        .route("/:id", get(get_order))
        .route("/:id/pay", post(pay_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/status", patch(update_order_status))
}

/// Creates the router for checkout
pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateStatusRequest {
    #[validate(length(min = 1, message = "Status is required"))]
    status: String,
}

/// Resolves identity for order paths. Sessions are never minted here: an
/// anonymous caller with no valid credentials has no orders to see.
async fn resolve_identity(
    state: &AppState,
    user: OptionalAuthUser,
    headers: &HeaderMap,
) -> Result<ResolvedIdentity, ServiceError> {
    let credentials = GuestCredentials::from_headers(headers);
    state
        .services
        .identity
        .resolve(user.0.map(|u| u.user_id), credentials.as_ref(), false)
        .await
}

/// Place an order from the caller's cart
async fn checkout(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Response, ServiceError> {
    let identity = resolve_identity(&state, user, &headers).await?;
    let order = state.services.checkout.checkout(&identity, payload).await?;

    Ok(created_response(order))
}

/// List the authenticated user's orders, folding in guest orders when a
/// validated guest session accompanies the request
async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let guest_session = match GuestCredentials::from_headers(&headers) {
        Some(credentials) => state.services.identity.validate_session(&credentials).await?,
        None => None,
    };

    let orders = state
        .services
        .orders
        .list_for_user(user.user_id, guest_session.as_ref())
        .await?;

    Ok(success_response(orders))
}

/// Get a single order with its line items, scoped to the owner
async fn get_order(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let identity = resolve_identity(&state, user, &headers).await?;
    let order = state
        .services
        .orders
        .get_order(identity.owner(), order_id)
        .await?;

    Ok(success_response(order))
}

/// Record a payment against an order
async fn pay_order(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<PayRequest>,
) -> Result<Response, ServiceError> {
    let identity = resolve_identity(&state, user, &headers).await?;
    let order = state
        .services
        .checkout
        .pay(&identity, order_id, payload)
        .await?;

    Ok(success_response(order))
}

/// Cancel an order
async fn cancel_order(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let identity = resolve_identity(&state, user, &headers).await?;
    let order = state.services.checkout.cancel(&identity, order_id).await?;

    Ok(success_response(order))
}

/// Move an order through the fulfillment state machine (admin only)
async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Response, ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "Admin role required".to_string(),
        ));
    }
    validate_input(&payload)?;

    let status = OrderStatus::from_str(payload.status.trim()).map_err(|_| {
        ServiceError::ValidationError(format!("Unknown order status '{}'", payload.status))
    })?;

    let order = state
        .services
        .order_status
        .update_status(order_id, status)
        .await?;
    let view = state.services.orders.resolve_view(order).await?;

    Ok(success_response(view))
}
