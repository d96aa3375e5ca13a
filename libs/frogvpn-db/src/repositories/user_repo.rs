use sqlx::PgPool;
use tracing::info;

use crate::models::stats::{referral_bonus, total_pages};
use crate::models::{
    AdminStats, ReferralEntry, ReferralPage, ReferralPayout, ReferralSummary, TopReferrer,
    TransactionType, User,
};
use crate::store::StoreError;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_or_create(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        referrer: Option<i64>,
    ) -> Result<User, StoreError> {
        let referrer = match referrer.filter(|r| *r != telegram_id) {
            Some(r) if self.get_by_telegram_id(r).await?.is_some() => Some(r),
            _ => None,
        };

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (telegram_id, username, referrer_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (telegram_id)
            DO UPDATE SET username = COALESCE(EXCLUDED.username, users.username)
            RETURNING *
            "#,
        )
        .bind(telegram_id)
        .bind(username)
        .bind(referrer)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn get_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE telegram_id = $1")
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find(&self, query: &str) -> Result<Option<User>, StoreError> {
        let query = query.trim();
        if let Ok(id) = query.parse::<i64>() {
            return self.get_by_telegram_id(id).await;
        }
        let username = query.trim_start_matches('@');
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE LOWER(username) = LOWER($1) LIMIT 1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn all_telegram_ids(&self) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT telegram_id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn credit(
        &self,
        telegram_id: i64,
        amount: f64,
        kind: TransactionType,
    ) -> Result<f64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, f64)> = sqlx::query_as(
            "UPDATE users SET balance = balance + $1 WHERE telegram_id = $2 RETURNING id, balance",
        )
        .bind(amount)
        .bind(telegram_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (user_id, balance) = row.ok_or(StoreError::NotFound)?;

        sqlx::query(
            "INSERT INTO transactions (user_id, amount, type, status) VALUES ($1, $2, $3, 'completed')",
        )
        .bind(user_id)
        .bind(amount)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(balance)
    }

    pub async fn debit(
        &self,
        telegram_id: i64,
        amount: f64,
        kind: TransactionType,
    ) -> Result<f64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(i64, f64)> = sqlx::query_as(
            "SELECT id, balance FROM users WHERE telegram_id = $1 FOR UPDATE",
        )
        .bind(telegram_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (user_id, balance) = current.ok_or(StoreError::NotFound)?;
        if balance < amount {
            return Err(StoreError::InsufficientFunds {
                balance,
                required: amount,
            });
        }

        let balance: f64 = sqlx::query_scalar(
            "UPDATE users SET balance = balance - $1 WHERE id = $2 RETURNING balance",
        )
        .bind(amount)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO transactions (user_id, amount, type, status) VALUES ($1, $2, $3, 'completed')",
        )
        .bind(user_id)
        .bind(amount)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(balance)
    }

    pub async fn top_up_with_referral(
        &self,
        telegram_id: i64,
        amount: f64,
    ) -> Result<Option<ReferralPayout>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, Option<i64>)> = sqlx::query_as(
            "UPDATE users SET balance = balance + $1 WHERE telegram_id = $2 RETURNING id, referrer_id",
        )
        .bind(amount)
        .bind(telegram_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (user_id, referrer) = row.ok_or(StoreError::NotFound)?;

        sqlx::query(
            "INSERT INTO transactions (user_id, amount, type, status) VALUES ($1, $2, 'top_up', 'completed')",
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        let mut payout = None;
        if let Some(referrer_tg) = referrer {
            let bonus = referral_bonus(amount);
            let referrer_id: Option<i64> = sqlx::query_scalar(
                r#"
                UPDATE users
                SET balance = balance + $1, total_ref_earnings = total_ref_earnings + $1
                WHERE telegram_id = $2
                RETURNING id
                "#,
            )
            .bind(bonus)
            .bind(referrer_tg)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(referrer_id) = referrer_id {
                sqlx::query(
                    "INSERT INTO transactions (user_id, amount, type, status) VALUES ($1, $2, 'referral_bonus', 'completed')",
                )
                .bind(referrer_id)
                .bind(bonus)
                .execute(&mut *tx)
                .await?;
                info!("Referral bonus {:.2} paid to {} for top-up by {}", bonus, referrer_tg, telegram_id);
                payout = Some(ReferralPayout {
                    referrer_telegram_id: referrer_tg,
                    bonus,
                });
            }
        }

        tx.commit().await?;
        Ok(payout)
    }

    pub async fn referral_summary(&self, telegram_id: i64) -> Result<ReferralSummary, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE referrer_id = $1")
            .bind(telegram_id)
            .fetch_one(&self.pool)
            .await?;
        let earnings: Option<f64> =
            sqlx::query_scalar("SELECT total_ref_earnings FROM users WHERE telegram_id = $1")
                .bind(telegram_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(ReferralSummary {
            count,
            earnings: earnings.unwrap_or_default(),
        })
    }

    pub async fn referrals_page(
        &self,
        telegram_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ReferralPage, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE referrer_id = $1")
            .bind(telegram_id)
            .fetch_one(&self.pool)
            .await?;
        let total_pages = total_pages(total, per_page);
        let page = page.clamp(1, total_pages);

        let items = sqlx::query_as::<_, ReferralEntry>(
            r#"
            SELECT telegram_id, username, created_at
            FROM users
            WHERE referrer_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(telegram_id)
        .bind(per_page as i64)
        .bind(((page - 1) * per_page) as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ReferralPage {
            items,
            total,
            page,
            total_pages,
        })
    }

    pub async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, StoreError> {
        let rows = sqlx::query_as::<_, TopReferrer>(
            r#"
            SELECT
                u.telegram_id,
                u.username,
                COUNT(r.id) AS referral_count,
                u.total_ref_earnings AS total_revenue
            FROM users u
            JOIN users r ON r.referrer_id = u.telegram_id
            GROUP BY u.id, u.telegram_id, u.username, u.total_ref_earnings
            ORDER BY total_revenue DESC, referral_count DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn admin_stats(&self) -> Result<AdminStats, StoreError> {
        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let new_users_today: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE created_at >= CURRENT_DATE")
                .fetch_one(&self.pool)
                .await?;
        let active_subscriptions: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subscriptions WHERE is_active = TRUE AND expires_at > NOW()",
        )
        .fetch_one(&self.pool)
        .await?;
        let total_balances: f64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(balance), 0)::float8 FROM users")
                .fetch_one(&self.pool)
                .await?;

        let revenue = |since: &'static str| {
            let sql = format!(
                "SELECT COALESCE(SUM(amount), 0)::float8 FROM transactions WHERE type = 'purchase' AND status = 'completed'{}",
                since
            );
            let pool = self.pool.clone();
            async move { sqlx::query_scalar::<_, f64>(&sql).fetch_one(&pool).await }
        };

        Ok(AdminStats {
            total_users,
            new_users_today,
            active_subscriptions,
            revenue_today: revenue(" AND created_at >= CURRENT_DATE").await?,
            revenue_month: revenue(" AND created_at >= DATE_TRUNC('month', CURRENT_DATE)").await?,
            revenue_all_time: revenue("").await?,
            total_balances,
        })
    }
}
