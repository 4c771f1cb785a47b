use crate::{
    entities::{
        promo_code::{self, Entity as PromoCode},
        promo_usage::{self, Entity as PromoUsage},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Promo-code validation, single-use-per-cart enforcement, and discount
/// computation. Codes are stored upper-cased; input is trimmed and
/// upper-cased before lookup so `" save10 "` matches `SAVE10`.
#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl PromotionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    /// Applies a promo code to a cart.
    ///
    /// Fails `InvalidPromo` when the code is unknown or expired, and
    /// `Conflict` when the same code was already applied to this cart. A
    /// consumed usage row blocks re-application until it is removed.
    #[instrument(skip(self))]
    pub async fn apply_to_cart(
        &self,
        cart_id: Uuid,
        code: &str,
    ) -> Result<promo_code::Model, ServiceError> {
        let code = Self::normalize(code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Promo code cannot be empty".to_string(),
            ));
        }

        let promo = PromoCode::find()
            .filter(promo_code::Column::Code.eq(code.clone()))
            .filter(promo_code::Column::ExpiresAt.gt(Utc::now()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidPromo(format!("Promo code {} is unknown or expired", code))
            })?;

        let existing = PromoUsage::find()
            .filter(promo_usage::Column::CartId.eq(cart_id))
            .filter(promo_usage::Column::Code.eq(code.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Promo code {} already applied to this cart",
                code
            )));
        }

        promo_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            code: Set(code.clone()),
            used_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::PromoApplied { cart_id, code })
            .await;

        Ok(promo)
    }

    /// Returns the most recently applied promo that is still active, along
    /// with its usage row. Usage rows whose code has since expired are
    /// inert and skipped, not an error.
    #[instrument(skip(self, conn))]
    pub async fn current_promo_for_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Option<(promo_usage::Model, promo_code::Model)>, ServiceError> {
        let usages = PromoUsage::find()
            .filter(promo_usage::Column::CartId.eq(cart_id))
            .order_by_desc(promo_usage::Column::UsedAt)
            .all(conn)
            .await?;

        for usage in usages {
            let promo = PromoCode::find()
                .filter(promo_code::Column::Code.eq(usage.code.clone()))
                .filter(promo_code::Column::ExpiresAt.gt(Utc::now()))
                .one(conn)
                .await?;
            if let Some(promo) = promo {
                return Ok(Some((usage, promo)));
            }
        }

        Ok(None)
    }

    /// Removes every usage row for the cart. Fails `ValidationError` when
    /// the cart had no promo to remove.
    #[instrument(skip(self))]
    pub async fn remove_from_cart(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        let deleted = PromoUsage::delete_many()
            .filter(promo_usage::Column::CartId.eq(cart_id))
            .exec(&*self.db)
            .await?;

        if deleted.rows_affected == 0 {
            return Err(ServiceError::ValidationError(
                "No promo code applied to this cart".to_string(),
            ));
        }

        self.event_sender
            .send_or_log(Event::PromoRemoved { cart_id })
            .await;

        Ok(())
    }

    /// Marks a promo consumed by deleting its usage rows for the cart.
    /// Runs on the checkout transaction.
    pub async fn consume_for_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        PromoUsage::delete_many()
            .filter(promo_usage::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// `subtotal × percentage / 100`, clamped to `[0, subtotal]` and
    /// rounded to cents.
    pub fn discount(subtotal: Decimal, percentage: Decimal) -> Decimal {
        let raw = subtotal * percentage / Decimal::from(100);
        raw.max(Decimal::ZERO)
            .min(subtotal)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn discount_basic_percentage() {
        assert_eq!(
            PromotionService::discount(dec!(16.00), dec!(10)),
            dec!(1.60)
        );
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        assert_eq!(
            PromotionService::discount(dec!(5.00), dec!(150)),
            dec!(5.00)
        );
    }

    #[test]
    fn discount_never_negative() {
        assert_eq!(
            PromotionService::discount(dec!(5.00), dec!(-10)),
            dec!(0)
        );
    }

    #[test]
    fn discount_rounds_to_cents() {
        // 10.01 * 15% = 1.5015 -> 1.50
        assert_eq!(
            PromotionService::discount(dec!(10.01), dec!(15)),
            dec!(1.50)
        );
    }

    #[test]
    fn codes_are_normalized() {
        assert_eq!(PromotionService::normalize("  save10 "), "SAVE10");
    }
}
