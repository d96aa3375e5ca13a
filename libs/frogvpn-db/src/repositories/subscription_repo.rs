use sqlx::PgPool;

use crate::models::{NewSubscription, Product, Subscription, SubscriptionWithDetails};
use crate::store::StoreError;

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let products =
            sqlx::query_as::<_, Product>("SELECT * FROM products ORDER BY sort_order, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(products)
    }

    pub async fn get_product(&self, id: i64) -> Result<Option<Product>, StoreError> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    pub async fn create(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        let sub = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, product_id, key_string, expires_at)
            SELECT id, $2, $3, $4 FROM users WHERE telegram_id = $1
            RETURNING *
            "#,
        )
        .bind(new.telegram_id)
        .bind(new.product_id)
        .bind(&new.key_string)
        .bind(new.expires_at)
        .fetch_optional(&self.pool)
        .await?;
        sub.ok_or(StoreError::NotFound)
    }

    pub async fn get_all_by_user(
        &self,
        telegram_id: i64,
    ) -> Result<Vec<SubscriptionWithDetails>, StoreError> {
        let subs = sqlx::query_as::<_, SubscriptionWithDetails>(
            r#"
            SELECT s.*, p.name AS product_name, p.country_flag
            FROM subscriptions s
            JOIN products p ON s.product_id = p.id
            JOIN users u ON s.user_id = u.id
            WHERE u.telegram_id = $1
            ORDER BY s.expires_at DESC
            "#,
        )
        .bind(telegram_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }
}
