use crate::handlers::common::success_response;
use crate::{
    entities::payment_method::{self, Entity as PaymentMethod},
    errors::ServiceError,
    services::products::ProductListQuery,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::get,
    Router,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde_json::json;
use uuid::Uuid;

/// Creates the router for catalog reads
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
}

/// Creates the router for payment method reads
pub fn payment_method_routes() -> Router<AppState> {
    Router::new().route("/", get(list_payment_methods))
}

async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Response, ServiceError> {
    let (products, total) = state.services.products.list_products(query).await?;

    Ok(success_response(json!({
        "products": products,
        "total": total,
    })))
}

async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let product = state.services.products.get_product(product_id).await?;

    Ok(success_response(product))
}

async fn list_payment_methods(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let methods = PaymentMethod::find()
        .filter(payment_method::Column::Active.eq(true))
        .order_by_asc(payment_method::Column::Name)
        .all(state.db.as_ref())
        .await?;

    Ok(success_response(methods))
}
