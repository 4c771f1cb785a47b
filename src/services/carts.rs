use crate::{
    entities::{
        cart::{self, Entity as Cart, Model as CartModel},
        cart_item::{self, Entity as CartItem},
        guest_session,
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{IdentityService, InventoryService, PromotionService},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::identity::CartOwner;

/// A cart line resolved against the catalog for display.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// A point-in-time view of a cart with computed totals. Totals are never
/// cached on the cart row; they are recomputed from the lines on every read.
#[derive(Debug, Clone, Serialize)]
pub struct CartSnapshot {
    pub cart_id: Uuid,
    pub items: Vec<CartLine>,
    pub subtotal: Decimal,
    pub promo_code: Option<String>,
    pub discount_percentage: Option<Decimal>,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Cart lifecycle: resolution per owner, line mutations, and the
/// claim-or-merge path that folds a guest's cart into an authenticated
/// user's cart at login.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    identity: Arc<IdentityService>,
    inventory: InventoryService,
    promotions: Arc<PromotionService>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        identity: Arc<IdentityService>,
        inventory: InventoryService,
        promotions: Arc<PromotionService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            identity,
            inventory,
            promotions,
        }
    }

    /// Looks up the owner's cart without creating one.
    #[instrument(skip(self, conn))]
    pub async fn find_existing<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner: CartOwner,
    ) -> Result<Option<CartModel>, ServiceError> {
        let query = match owner {
            CartOwner::User(user_id) => Cart::find().filter(cart::Column::UserId.eq(user_id)),
            CartOwner::Guest(session_id) => {
                Cart::find().filter(cart::Column::SessionId.eq(session_id))
            }
        };
        Ok(query.one(conn).await?)
    }

    /// Resolves the owner's cart, creating an empty one when absent.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, owner: CartOwner) -> Result<CartModel, ServiceError> {
        if let Some(cart) = self.find_existing(&*self.db, owner).await? {
            return Ok(cart);
        }

        let now = Utc::now();
        let (user_id, session_id) = match owner {
            CartOwner::User(id) => (Some(id), None),
            CartOwner::Guest(id) => (None, Some(id)),
        };

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            session_id: Set(session_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender.send_or_log(Event::CartCreated(cart.id)).await;

        Ok(cart)
    }

    /// Resolves the user's cart, folding in a validated guest session's cart
    /// when one accompanies the request.
    ///
    /// When the user has no cart yet, the guest cart is claimed outright by
    /// rewriting its owner. Otherwise line items are merged (quantities for
    /// the same product are summed, novel lines are moved) and the guest
    /// cart row is deleted. The whole fold, including session rotation, is
    /// one transaction, so a crash cannot leave a claimed cart reachable
    /// through a still-valid guest token.
    #[instrument(skip(self, guest_session), fields(session_id = ?guest_session.as_ref().map(|s| s.id)))]
    pub async fn get_or_create_for_user(
        &self,
        user_id: Uuid,
        guest_session: Option<&guest_session::Model>,
    ) -> Result<CartModel, ServiceError> {
        let Some(session) = guest_session else {
            return self.get_or_create(CartOwner::User(user_id)).await;
        };

        let txn = self.db.begin().await?;

        let cart = match self.fold_guest_cart(&txn, user_id, session.id).await? {
            Some(cart) => cart,
            None => {
                let now = Utc::now();
                cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(Some(user_id)),
                    session_id: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };

        // The old token must never resolve a cart again.
        self.identity.rotate_session(&txn, session.id).await?;

        txn.commit().await?;

        Ok(cart)
    }

    /// Folds a guest session's cart into the user's on an open transaction.
    ///
    /// Returns the user's cart after the fold, or `None` when neither side
    /// has one. Does not create a cart and does not rotate the session, so
    /// callers decide both. Order migration runs this too, then rotates, so
    /// login through any door leaves no cart keyed to a dead session.
    pub async fn fold_guest_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        let user_cart = self.find_existing(conn, CartOwner::User(user_id)).await?;
        let guest_cart = self
            .find_existing(conn, CartOwner::Guest(session_id))
            .await?;

        let cart = match (user_cart, guest_cart) {
            (None, Some(guest_cart)) => {
                // Claim: rewrite the owner, no data movement.
                let guest_cart_id = guest_cart.id;
                let mut active: cart::ActiveModel = guest_cart.into();
                active.user_id = Set(Some(user_id));
                active.session_id = Set(None);
                active.updated_at = Set(Utc::now());
                let claimed = active.update(conn).await?;
                info!(cart_id = %guest_cart_id, user_id = %user_id, "Guest cart claimed");
                Some(claimed)
            }
            (Some(user_cart), Some(guest_cart)) => {
                let guest_cart_id = guest_cart.id;
                self.merge_lines(conn, &user_cart, &guest_cart).await?;
                // Usage rows keyed to the deleted cart would otherwise linger.
                self.promotions.consume_for_cart(conn, guest_cart_id).await?;
                guest_cart.delete(conn).await?;

                let mut active: cart::ActiveModel = user_cart.into();
                active.updated_at = Set(Utc::now());
                let merged = active.update(conn).await?;

                self.event_sender
                    .send_or_log(Event::CartMerged {
                        user_cart_id: merged.id,
                        guest_cart_id,
                    })
                    .await;
                Some(merged)
            }
            (user_cart, None) => user_cart,
        };

        Ok(cart)
    }

    /// Moves every guest line into the user cart: same-product lines have
    /// their quantities summed, novel lines are re-pointed.
    async fn merge_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_cart: &CartModel,
        guest_cart: &CartModel,
    ) -> Result<(), ServiceError> {
        let user_items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(user_cart.id))
            .all(conn)
            .await?;
        let guest_items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .all(conn)
            .await?;

        for guest_item in guest_items {
            match user_items
                .iter()
                .find(|i| i.product_id == guest_item.product_id)
            {
                Some(existing) => {
                    let summed = existing.quantity + guest_item.quantity;
                    let mut active: cart_item::ActiveModel = existing.clone().into();
                    active.quantity = Set(summed);
                    active.update(conn).await?;
                    guest_item.delete(conn).await?;
                }
                None => {
                    let mut active: cart_item::ActiveModel = guest_item.into();
                    active.cart_id = Set(user_cart.id);
                    active.update(conn).await?;
                }
            }
        }

        Ok(())
    }

    /// Adds a product to the cart, folding into an existing line when the
    /// product is already present. The requested total (existing + new) is
    /// validated against current stock.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart: &CartModel,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be positive".to_string(),
            ));
        }

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;

        let requested_total = existing.as_ref().map_or(quantity, |i| i.quantity + quantity);
        self.inventory
            .check_available(&*self.db, product_id, requested_total)
            .await?;

        let item = match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(requested_total);
                active.update(&*self.db).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                    added_at: Set(Utc::now()),
                }
                .insert(&*self.db)
                .await?
            }
        };

        self.touch(cart.id).await?;
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id,
            })
            .await;

        Ok(item)
    }

    /// Sets a line's quantity; zero removes the line. The item must belong
    /// to the caller's cart.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        cart: &CartModel,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be negative".to_string(),
            ));
        }

        let item = CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if quantity == 0 {
            item.delete(&*self.db).await?;
            self.touch(cart.id).await?;
            return Ok(None);
        }

        self.inventory
            .check_available(&*self.db, item.product_id, quantity)
            .await?;

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        let updated = active.update(&*self.db).await?;

        self.touch(cart.id).await?;

        Ok(Some(updated))
    }

    /// Removes a line outright.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, cart: &CartModel, item_id: Uuid) -> Result<(), ServiceError> {
        let item = CartItem::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        item.delete(&*self.db).await?;
        self.touch(cart.id).await?;

        Ok(())
    }

    /// Deletes every line in the cart. The cart row survives.
    #[instrument(skip(self))]
    pub async fn clear(&self, cart: &CartModel) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&*self.db)
            .await?;

        self.touch(cart.id).await?;
        self.event_sender.send_or_log(Event::CartCleared(cart.id)).await;

        Ok(())
    }

    /// Clears the cart's lines on an open transaction, without events.
    /// Checkout uses this so the clear commits or rolls back with the order.
    pub async fn clear_lines_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Loads the cart's lines joined to their products, preserving insertion
    /// order. A line referencing a vanished product fails validation rather
    /// than being skipped.
    pub async fn resolved_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<(cart_item::Model, product::Model)>, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::AddedAt)
            .all(conn)
            .await?;

        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
            let product = Product::find_by_id(item.product_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Cart references missing product {}",
                        item.product_id
                    ))
                })?;
            resolved.push((item, product));
        }

        Ok(resolved)
    }

    /// Builds the display view: lines with product names, subtotal, active
    /// promo discount, and total. Subtotal accumulates per line in fixed
    /// point, so ordering cannot perturb the rounded result.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, cart: &CartModel) -> Result<CartSnapshot, ServiceError> {
        let resolved = self.resolved_lines(&*self.db, cart.id).await?;

        let mut items = Vec::with_capacity(resolved.len());
        let mut subtotal = Decimal::ZERO;
        for (item, product) in resolved {
            let line_total = product.price * Decimal::from(item.quantity);
            subtotal += line_total;
            items.push(CartLine {
                item_id: item.id,
                product_id: product.id,
                product_name: product.name,
                unit_price: product.price,
                quantity: item.quantity,
                line_total,
            });
        }

        let promo = self
            .promotions
            .current_promo_for_cart(&*self.db, cart.id)
            .await?;
        let (promo_code, discount_percentage, discount_amount) = match promo {
            Some((_, promo)) => {
                let amount = PromotionService::discount(subtotal, promo.discount_percentage);
                (Some(promo.code), Some(promo.discount_percentage), amount)
            }
            None => (None, None, Decimal::ZERO),
        };

        Ok(CartSnapshot {
            cart_id: cart.id,
            items,
            subtotal,
            promo_code,
            discount_percentage,
            discount_amount,
            total: subtotal - discount_amount,
            updated_at: cart.updated_at,
        })
    }

    async fn touch(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        let Some(cart) = Cart::find_by_id(cart_id).one(&*self.db).await? else {
            return Ok(());
        };
        let mut active: cart::ActiveModel = cart.into();
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(())
    }
}
