use sqlx::PgPool;
use tracing::info;

use crate::models::{PromoCode, PromoRejection, PromoStats};
use crate::store::StoreError;

#[derive(Debug, Clone)]
pub struct PromoRepository {
    pool: PgPool,
}

impl PromoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        code: &str,
        amount: f64,
        max_activations: i32,
    ) -> Result<PromoCode, StoreError> {
        let promo = sqlx::query_as::<_, PromoCode>(
            r#"
            INSERT INTO promo_codes (code, amount, max_activations)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(code)
        .bind(amount)
        .bind(max_activations)
        .fetch_optional(&self.pool)
        .await?;
        promo.ok_or_else(|| StoreError::Conflict(format!("promo code {} already exists", code)))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<PromoCode>, StoreError> {
        let promo = sqlx::query_as::<_, PromoCode>("SELECT * FROM promo_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(promo)
    }

    pub async fn list(&self) -> Result<Vec<PromoCode>, StoreError> {
        let promos = sqlx::query_as::<_, PromoCode>(
            "SELECT * FROM promo_codes ORDER BY is_active DESC, created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(promos)
    }

    pub async fn deactivate(&self, code: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE promo_codes SET is_active = FALSE WHERE code = $1 AND is_active = TRUE",
        )
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn activate(&self, telegram_id: i64, code: &str) -> Result<PromoCode, StoreError> {
        let mut tx = self.pool.begin().await?;

        let promo = sqlx::query_as::<_, PromoCode>(
            "SELECT * FROM promo_codes WHERE code = $1 FOR UPDATE",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::PromoRejected(PromoRejection::NotFound))?;

        if !promo.is_active {
            return Err(StoreError::PromoRejected(PromoRejection::Inactive));
        }
        if promo.is_exhausted() {
            return Err(StoreError::PromoRejected(PromoRejection::Exhausted));
        }

        let user_id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE telegram_id = $1")
            .bind(telegram_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO promo_activations (promo_id, user_id, telegram_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (promo_id, telegram_id) DO NOTHING
            "#,
        )
        .bind(promo.id)
        .bind(user_id)
        .bind(telegram_id)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::PromoRejected(PromoRejection::AlreadyUsed));
        }

        let promo = sqlx::query_as::<_, PromoCode>(
            "UPDATE promo_codes SET activations_used = activations_used + 1 WHERE id = $1 RETURNING *",
        )
        .bind(promo.id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET balance = balance + $1 WHERE id = $2")
            .bind(promo.amount)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO transactions (user_id, amount, type, status) VALUES ($1, $2, 'promo', 'completed')",
        )
        .bind(user_id)
        .bind(promo.amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("Promo {} activated by {}", promo.code, telegram_id);
        Ok(promo)
    }

    pub async fn stats(&self) -> Result<Vec<PromoStats>, StoreError> {
        let stats = sqlx::query_as::<_, PromoStats>(
            r#"
            SELECT code, amount, max_activations, activations_used,
                   (amount * activations_used)::float8 AS total_bonus_paid
            FROM promo_codes
            WHERE is_active = TRUE
            ORDER BY activations_used DESC, created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(stats)
    }
}
