use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::{
    AdminStats, NewSubscription, Product, PromoCode, PromoStats, ReferralPage, ReferralPayout,
    ReferralSummary, Subscription, SubscriptionWithDetails, TopReferrer, TransactionType, User,
};
use crate::repositories::{PromoRepository, SubscriptionRepository, UserRepository};
use crate::store::{Store, StoreError};

/// PostgreSQL-backed [`Store`], composed of the per-table repositories.
#[derive(Debug, Clone)]
pub struct PgStore {
    users: UserRepository,
    subscriptions: SubscriptionRepository,
    promos: PromoRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            promos: PromoRepository::new(pool),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_or_create_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        referrer: Option<i64>,
    ) -> Result<User, StoreError> {
        self.users.get_or_create(telegram_id, username, referrer).await
    }

    async fn get_user(&self, telegram_id: i64) -> Result<Option<User>, StoreError> {
        self.users.get_by_telegram_id(telegram_id).await
    }

    async fn find_user(&self, query: &str) -> Result<Option<User>, StoreError> {
        self.users.find(query).await
    }

    async fn list_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        self.users.all_telegram_ids().await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        self.subscriptions.list_products().await
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>, StoreError> {
        self.subscriptions.get_product(id).await
    }

    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        self.subscriptions.create(new).await
    }

    async fn list_subscriptions(
        &self,
        telegram_id: i64,
    ) -> Result<Vec<SubscriptionWithDetails>, StoreError> {
        self.subscriptions.get_all_by_user(telegram_id).await
    }

    async fn credit(
        &self,
        telegram_id: i64,
        amount: f64,
        kind: TransactionType,
    ) -> Result<f64, StoreError> {
        self.users.credit(telegram_id, amount, kind).await
    }

    async fn debit(
        &self,
        telegram_id: i64,
        amount: f64,
        kind: TransactionType,
    ) -> Result<f64, StoreError> {
        self.users.debit(telegram_id, amount, kind).await
    }

    async fn top_up_with_referral(
        &self,
        telegram_id: i64,
        amount: f64,
    ) -> Result<Option<ReferralPayout>, StoreError> {
        self.users.top_up_with_referral(telegram_id, amount).await
    }

    async fn create_promo(
        &self,
        code: &str,
        amount: f64,
        max_activations: i32,
    ) -> Result<PromoCode, StoreError> {
        self.promos.create(code, amount, max_activations).await
    }

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>, StoreError> {
        self.promos.get_by_code(code).await
    }

    async fn list_promos(&self) -> Result<Vec<PromoCode>, StoreError> {
        self.promos.list().await
    }

    async fn deactivate_promo(&self, code: &str) -> Result<bool, StoreError> {
        self.promos.deactivate(code).await
    }

    async fn activate_promo(&self, telegram_id: i64, code: &str) -> Result<PromoCode, StoreError> {
        self.promos.activate(telegram_id, code).await
    }

    async fn promo_stats(&self) -> Result<Vec<PromoStats>, StoreError> {
        self.promos.stats().await
    }

    async fn referral_summary(&self, telegram_id: i64) -> Result<ReferralSummary, StoreError> {
        self.users.referral_summary(telegram_id).await
    }

    async fn referrals_page(
        &self,
        telegram_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ReferralPage, StoreError> {
        self.users.referrals_page(telegram_id, page, per_page).await
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, StoreError> {
        self.users.top_referrers(limit).await
    }

    async fn admin_stats(&self) -> Result<AdminStats, StoreError> {
        self.users.admin_stats().await
    }
}
