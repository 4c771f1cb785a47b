use crate::{
    entities::{
        order::{self, Entity as Order},
        order_item::{self, Entity as OrderItem},
        product::Entity as Product,
    },
    errors::ServiceError,
    services::{CartService, IdentityService},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::identity::CartOwner;

/// An order line resolved for display.
#[derive(Debug, Clone, Serialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub price_per_unit: Decimal,
    pub line_total: Decimal,
}

/// An order with its resolved line items.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<OrderLine>,
}

/// Owner-scoped order reads plus the login-time migration that re-homes a
/// guest's orders onto the authenticated user.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    identity: Arc<IdentityService>,
    carts: Arc<CartService>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        identity: Arc<IdentityService>,
        carts: Arc<CartService>,
    ) -> Self {
        Self { db, identity, carts }
    }

    /// Loads an order scoped to its owner. An order belonging to someone
    /// else is indistinguishable from one that does not exist.
    pub async fn find_owned<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner: CartOwner,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let query = Order::find_by_id(order_id);
        let query = match owner {
            CartOwner::User(user_id) => query.filter(order::Column::UserId.eq(user_id)),
            CartOwner::Guest(session_id) => {
                query.filter(order::Column::SessionId.eq(session_id))
            }
        };

        query
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Loads an order with its resolved line items, scoped to the owner.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        owner: CartOwner,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let order = self.find_owned(&*self.db, owner, order_id).await?;
        self.resolve_view(order).await
    }

    /// Attaches display lines to an order. Product names are looked up
    /// live; a product deleted since purchase still shows the line with its
    /// snapshotted price.
    pub async fn resolve_view(&self, order: order::Model) -> Result<OrderView, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let items = items
            .into_iter()
            .map(|(item, product)| OrderLine {
                product_id: item.product_id,
                product_name: product
                    .map(|p| p.name)
                    .unwrap_or_else(|| "(unavailable)".to_string()),
                quantity: item.quantity,
                price_per_unit: item.price_per_unit,
                line_total: item.price_per_unit * Decimal::from(item.quantity),
            })
            .collect();

        Ok(OrderView { order, items })
    }

    /// Lists the authenticated user's orders, newest first.
    ///
    /// When a validated guest session rides along, that session's orders
    /// are re-homed onto the user, its cart is folded into the user's, and
    /// the session is rotated, all in one transaction, so a guest's purchase
    /// history and in-progress cart follow them through login exactly once.
    #[instrument(skip(self, guest_session), fields(session_id = ?guest_session.map(|s| s.id)))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        guest_session: Option<&crate::entities::guest_session::Model>,
    ) -> Result<Vec<order::Model>, ServiceError> {
        if let Some(session) = guest_session {
            let txn = self.db.begin().await?;

            let migrated = Order::update_many()
                .col_expr(order::Column::UserId, Expr::value(user_id))
                .col_expr(order::Column::SessionId, Expr::value(Option::<Uuid>::None))
                .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(order::Column::SessionId.eq(session.id))
                .exec(&txn)
                .await?;

            // Rotation kills the session's cart lookup key, so the cart
            // must be folded before the session goes.
            self.carts.fold_guest_cart(&txn, user_id, session.id).await?;
            self.identity.rotate_session(&txn, session.id).await?;

            txn.commit().await?;

            if migrated.rows_affected > 0 {
                info!(
                    user_id = %user_id,
                    count = migrated.rows_affected,
                    "Guest orders migrated to user"
                );
            }
        }

        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::OrderDate)
            .all(&*self.db)
            .await?;

        Ok(orders)
    }
}
