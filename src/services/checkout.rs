use crate::{
    config::AppConfig,
    entities::{
        order::{self, OrderStatus},
        order_item,
        payment::{self},
        payment_method::{self, Entity as PaymentMethod},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        identity::ResolvedIdentity, CartService, InventoryService, OrderService,
        OrderStatusService, PromotionService,
    },
};
use chrono::Utc;
use rust_decimal::{prelude::FromPrimitive, Decimal, RoundingStrategy};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::orders::OrderView;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, message = "Billing address is required"))]
    pub billing_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayRequest {
    pub payment_method_id: Uuid,
}

/// Turns a cart into an order inside one transaction: stock is validated
/// and decremented, the order and its line items are inserted with current
/// prices snapshotted, the cart is cleared, and any applied promo is
/// consumed. Nothing survives a failure part-way through.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    carts: Arc<CartService>,
    orders: Arc<OrderService>,
    promotions: Arc<PromotionService>,
    inventory: InventoryService,
    order_status: Arc<OrderStatusService>,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        carts: Arc<CartService>,
        orders: Arc<OrderService>,
        promotions: Arc<PromotionService>,
        inventory: InventoryService,
        order_status: Arc<OrderStatusService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            carts,
            orders,
            promotions,
            inventory,
            order_status,
        }
    }

    fn tax_rate(&self) -> Decimal {
        if !self.config.tax_enabled {
            return Decimal::ZERO;
        }
        Decimal::from_f64(self.config.default_tax_rate)
            .unwrap_or(Decimal::ZERO)
            .round_dp(4)
    }

    /// Places an order from the caller's existing cart.
    ///
    /// A guest cart riding alongside an authenticated caller is merged
    /// first, so logging in mid-shop never strands a cart. The cart itself
    /// is never created here: checking out with no cart is a validation
    /// failure, which also makes an accidental double-submit fail cleanly
    /// after the first success clears the cart.
    #[instrument(skip(self, identity, request))]
    pub async fn checkout(
        &self,
        identity: &ResolvedIdentity,
        request: CheckoutRequest,
    ) -> Result<OrderView, ServiceError> {
        request.validate()?;
        let shipping_address = request.shipping_address.trim().to_string();
        let billing_address = request.billing_address.trim().to_string();
        if shipping_address.is_empty() || billing_address.is_empty() {
            return Err(ServiceError::ValidationError(
                "Shipping and billing addresses are required".to_string(),
            ));
        }

        if let ResolvedIdentity::User {
            user_id,
            guest_session: Some(session),
        } = identity
        {
            self.carts
                .get_or_create_for_user(*user_id, Some(session))
                .await?;
        }

        let owner = identity.owner();
        let cart = self
            .carts
            .find_existing(&*self.db, owner)
            .await?
            .ok_or_else(|| ServiceError::ValidationError("No cart found".to_string()))?;

        let lines = self.carts.resolved_lines(&*self.db, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        for (item, _) in &lines {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Invalid quantity for product {}",
                    item.product_id
                )));
            }
        }

        let mut subtotal = Decimal::ZERO;
        for (item, product) in &lines {
            subtotal += product.price * Decimal::from(item.quantity);
        }

        let promo = self
            .promotions
            .current_promo_for_cart(&*self.db, cart.id)
            .await?;
        let (promo_code, discount_percentage) = match &promo {
            Some((_, p)) => (Some(p.code.clone()), p.discount_percentage),
            None => (None, Decimal::ZERO),
        };
        let discount_amount = PromotionService::discount(subtotal, discount_percentage);
        let post_discount = subtotal - discount_amount;

        let tax_rate = self.tax_rate();
        let tax_amount = (post_discount * tax_rate)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let total_amount = post_discount + tax_amount;

        let (user_id, session_id) = match owner {
            super::identity::CartOwner::User(id) => (Some(id), None),
            super::identity::CartOwner::Guest(id) => (None, Some(id)),
        };

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let line_refs: Vec<(Uuid, i32)> = lines
            .iter()
            .map(|(item, _)| (item.product_id, item.quantity))
            .collect();
        self.inventory.validate_and_decrement(&txn, &line_refs).await?;

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            user_id: Set(user_id),
            session_id: Set(session_id),
            status: Set(OrderStatus::Pending.to_string()),
            order_date: Set(now),
            subtotal: Set(subtotal),
            discount_amount: Set(discount_amount),
            discount_percentage: Set(discount_percentage),
            promo_code: Set(promo_code),
            tax_rate: Set(tax_rate),
            tax_amount: Set(tax_amount),
            total_amount: Set(total_amount),
            shipping_address: Set(shipping_address),
            billing_address: Set(billing_address),
            payment_method_id: Set(None),
            shipped_date: Set(None),
            delivered_date: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for (item, product) in &lines {
            // Unit price is snapshotted here; later catalog price changes
            // must not rewrite history.
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                price_per_unit: Set(product.price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        self.carts.clear_lines_on(&txn, cart.id).await?;
        if promo.is_some() {
            self.promotions.consume_for_cart(&txn, cart.id).await?;
        }

        txn.commit().await?;

        info!(order_id = %order_id, total = %total_amount, "Checkout complete");
        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;

        self.orders.resolve_view(order).await
    }

    /// Records a payment and moves the order to `paid`. The payment row and
    /// the status change commit together.
    #[instrument(skip(self, identity))]
    pub async fn pay(
        &self,
        identity: &ResolvedIdentity,
        order_id: Uuid,
        request: PayRequest,
    ) -> Result<OrderView, ServiceError> {
        let order = self
            .orders
            .find_owned(&*self.db, identity.owner(), order_id)
            .await?;

        let method = PaymentMethod::find_by_id(request.payment_method_id)
            .one(&*self.db)
            .await?
            .filter(|m: &payment_method::Model| m.active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Payment method {} not found",
                    request.payment_method_id
                ))
            })?;

        let txn = self.db.begin().await?;

        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            payment_method_id: Set(method.id),
            amount: Set(order.total_amount),
            paid_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let mut active: order::ActiveModel = order.clone().into();
        active.payment_method_id = Set(Some(method.id));
        let order = active.update(&txn).await?;

        let order = self
            .order_status
            .transition(&txn, order, OrderStatus::Paid)
            .await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderPaid(order_id)).await;

        self.orders.resolve_view(order).await
    }

    /// Cancels an order through the state machine. Stock is not returned to
    /// the shelf; restocking is a fulfillment decision taken elsewhere.
    #[instrument(skip(self, identity))]
    pub async fn cancel(
        &self,
        identity: &ResolvedIdentity,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let order = self
            .orders
            .find_owned(&*self.db, identity.owner(), order_id)
            .await?;

        let order = self
            .order_status
            .transition(&*self.db, order, OrderStatus::Cancelled)
            .await?;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;

        self.orders.resolve_view(order).await
    }
}

fn generate_order_number() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", &id[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_are_prefixed_and_unique() {
        let a = generate_order_number();
        let b = generate_order_number();
        assert!(a.starts_with("ORD-"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
