use crate::{
    entities::order::{self, Entity as Order, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// The order lifecycle state machine.
///
/// ```text
/// pending    -> paid | cancelled
/// paid       -> processing | cancelled | refunded
/// processing -> shipped | cancelled
/// shipped    -> delivered
/// delivered, cancelled, refunded: terminal
/// ```
///
/// Every status change in the system funnels through [`transition`], which
/// also stamps `shipped_date` / `delivered_date` as the order crosses those
/// states.
///
/// [`transition`]: OrderStatusService::transition
pub fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Paid)
            | (Pending, Cancelled)
            | (Paid, Processing)
            | (Paid, Cancelled)
            | (Paid, Refunded)
            | (Processing, Shipped)
            | (Processing, Cancelled)
            | (Shipped, Delivered)
    )
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Moves an order to a new status on the caller's connection.
    ///
    /// Rejects disallowed edges with `InvalidStatusTransition`. Entering
    /// `shipped` stamps `shipped_date`; entering `delivered` stamps
    /// `delivered_date` and backfills `shipped_date` if the shipment event
    /// was never recorded.
    #[instrument(skip(self, conn, order), fields(order_id = %order.id))]
    pub async fn transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: order::Model,
        to: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let from = order.parsed_status()?;

        if !transition_allowed(from, to) {
            return Err(ServiceError::InvalidStatusTransition {
                order_id: order.id,
                from,
                to,
            });
        }

        let order_id = order.id;
        let now = Utc::now();
        let shipped_date = order.shipped_date;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(to.to_string());
        active.updated_at = Set(now);
        match to {
            OrderStatus::Shipped => {
                active.shipped_date = Set(Some(now));
            }
            OrderStatus::Delivered => {
                active.delivered_date = Set(Some(now));
                if shipped_date.is_none() {
                    active.shipped_date = Set(Some(now));
                }
            }
            _ => {}
        }

        let updated = active.update(conn).await?;

        info!(order_id = %order_id, from = %from, to = %to, "Order status transition");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from.to_string(),
                new_status: to.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Admin-facing status update by order id.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        to: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        self.transition(&*self.db, order, to).await
    }
}
