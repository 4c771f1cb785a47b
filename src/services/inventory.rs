use crate::{
    entities::product::{self, Entity as Product},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use std::collections::BTreeMap;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Stock validation and decrement.
///
/// Decrements are guarded at the database layer: the UPDATE only matches
/// rows that still hold enough stock, so two concurrent checkouts racing
/// for the last units cannot both succeed. Stock never goes negative.
#[derive(Clone, Default)]
pub struct InventoryService;

impl InventoryService {
    pub fn new() -> Self {
        Self
    }

    /// Loads a product and verifies it can cover `quantity`. Used for the
    /// advisory check when a line is added to a cart; the authoritative
    /// check happens again at checkout.
    #[instrument(skip(self, conn))]
    pub async fn check_available<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<product::Model, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if product.stock_quantity < quantity {
            return Err(ServiceError::InsufficientStock {
                product_id,
                available: product.stock_quantity,
                requested: quantity,
            });
        }

        Ok(product)
    }

    /// Validates and decrements stock for a set of order lines, all or
    /// nothing. Duplicate product ids are summed before checking, so a
    /// product cannot pass validation in slices while failing in aggregate.
    ///
    /// Must be called on an open transaction: any [`ServiceError`] returned
    /// here aborts the whole checkout and no decrement survives.
    #[instrument(skip(self, conn, lines))]
    pub async fn validate_and_decrement<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[(Uuid, i32)],
    ) -> Result<(), ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "No lines to reserve stock for".to_string(),
            ));
        }

        let mut requested: BTreeMap<Uuid, i32> = BTreeMap::new();
        for (product_id, quantity) in lines {
            if *quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Invalid quantity {} for product {}",
                    quantity, product_id
                )));
            }
            *requested.entry(*product_id).or_insert(0) += quantity;
        }

        // Upfront pass so the caller gets a precise error before any row
        // is touched.
        let ids: Vec<Uuid> = requested.keys().copied().collect();
        let products = Product::find()
            .filter(product::Column::Id.is_in(ids.clone()))
            .all(conn)
            .await?;

        for id in &ids {
            // A dangling product reference means the request itself is bad,
            // not that stock ran out.
            let product = products.iter().find(|p| p.id == *id).ok_or_else(|| {
                ServiceError::ValidationError(format!("Unknown product reference {}", id))
            })?;
            let quantity = requested[id];
            if product.stock_quantity < quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id: *id,
                    available: product.stock_quantity,
                    requested: quantity,
                });
            }
        }

        // Guarded decrement. The filter re-checks availability so a
        // concurrent checkout that drained stock between the read above and
        // this write makes the UPDATE match zero rows instead of driving
        // the count negative.
        for (product_id, quantity) in &requested {
            let result = Product::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).sub(*quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(*product_id))
                .filter(product::Column::StockQuantity.gte(*quantity))
                .exec(conn)
                .await?;

            if result.rows_affected == 0 {
                warn!(product_id = %product_id, "Stock drained by concurrent checkout");
                let available = Product::find_by_id(*product_id)
                    .one(conn)
                    .await?
                    .map(|p| p.stock_quantity)
                    .unwrap_or(0);
                return Err(ServiceError::InsufficientStock {
                    product_id: *product_id,
                    available,
                    requested: *quantity,
                });
            }
        }

        Ok(())
    }
}
