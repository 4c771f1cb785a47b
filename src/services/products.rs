use crate::{
    entities::product::{self, Entity as Product},
    errors::ServiceError,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read-side access to the product catalog. Product writes happen through
/// an upstream catalog pipeline; this service only lists and fetches.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductListQuery {
    pub category: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fetches a single product by id.
    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Lists products, optionally filtered by category, newest first.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        query: ProductListQuery,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 100);

        let mut find = Product::find().order_by_desc(product::Column::CreatedAt);
        if let Some(category) = &query.category {
            find = find.filter(product::Column::Category.eq(category.clone()));
        }

        let total = find.clone().count(&*self.db).await?;
        let products = find
            .offset((page - 1) * per_page)
            .limit(per_page)
            .all(&*self.db)
            .await?;

        Ok((products, total))
    }
}
