use crate::handlers::common::{
    created_response, no_content_response, success_response, validate_input, with_session_headers,
};
use crate::{
    auth::{guest::GuestCredentials, OptionalAuthUser},
    entities::cart::Model as CartModel,
    errors::ServiceError,
    services::identity::ResolvedIdentity,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/:item_id", put(update_item).delete(remove_item))
        .route("/promo", post(apply_promo).delete(remove_promo))
}

#[derive(Debug, Deserialize, Validate)]
struct AddItemRequest {
    product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
struct UpdateItemRequest {
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
struct ApplyPromoRequest {
    #[validate(length(min = 1, message = "Promo code is required"))]
    code: String,
}

/// Resolves the caller's identity and cart in one step. Authenticated
/// callers get the claim-or-merge treatment when valid guest credentials
/// ride along; anonymous callers get a session minted when `allow_create`
/// permits, otherwise the request is rejected as identity-less.
async fn resolve_cart(
    state: &AppState,
    user: OptionalAuthUser,
    headers: &HeaderMap,
    allow_create: bool,
) -> Result<(ResolvedIdentity, CartModel), ServiceError> {
    let credentials = GuestCredentials::from_headers(headers);
    let identity = state
        .services
        .identity
        .resolve(
            user.0.map(|u| u.user_id),
            credentials.as_ref(),
            allow_create,
        )
        .await?;

    let cart = match &identity {
        ResolvedIdentity::User {
            user_id,
            guest_session,
        } => {
            state
                .services
                .carts
                .get_or_create_for_user(*user_id, guest_session.as_ref())
                .await?
        }
        ResolvedIdentity::Guest { .. } => {
            state.services.carts.get_or_create(identity.owner()).await?
        }
    };

    Ok((identity, cart))
}

/// Get the caller's cart with computed totals
async fn get_cart(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let (identity, cart) = resolve_cart(&state, user, &headers, true).await?;
    let snapshot = state.services.carts.snapshot(&cart).await?;

    Ok(with_session_headers(
        success_response(snapshot),
        identity.issued_session(),
    ))
}

/// Add a product to the cart
async fn add_item(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
    Json(payload): Json<AddItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let (identity, cart) = resolve_cart(&state, user, &headers, true).await?;
    state
        .services
        .carts
        .add_item(&cart, payload.product_id, payload.quantity)
        .await?;
    let snapshot = state.services.carts.snapshot(&cart).await?;

    Ok(with_session_headers(
        created_response(snapshot),
        identity.issued_session(),
    ))
}

/// Update a cart line's quantity; zero removes the line
async fn update_item(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let (_, cart) = resolve_cart(&state, user, &headers, false).await?;
    state
        .services
        .carts
        .update_item_quantity(&cart, item_id, payload.quantity)
        .await?;
    let snapshot = state.services.carts.snapshot(&cart).await?;

    Ok(success_response(snapshot))
}

/// Remove a cart line
async fn remove_item(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let (_, cart) = resolve_cart(&state, user, &headers, false).await?;
    state.services.carts.remove_item(&cart, item_id).await?;

    Ok(no_content_response())
}

/// Clear the cart
async fn clear_cart(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let (_, cart) = resolve_cart(&state, user, &headers, false).await?;
    state.services.carts.clear(&cart).await?;

    Ok(no_content_response())
}

/// Apply a promo code to the cart
async fn apply_promo(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
    Json(payload): Json<ApplyPromoRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let (_, cart) = resolve_cart(&state, user, &headers, false).await?;
    state
        .services
        .promotions
        .apply_to_cart(cart.id, &payload.code)
        .await?;
    let snapshot = state.services.carts.snapshot(&cart).await?;

    Ok(success_response(snapshot))
}

/// Remove the applied promo code
async fn remove_promo(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let (_, cart) = resolve_cart(&state, user, &headers, false).await?;
    state.services.promotions.remove_from_cart(cart.id).await?;
    let snapshot = state.services.carts.snapshot(&cart).await?;

    Ok(success_response(snapshot))
}
