use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    AdminStats, NewSubscription, Product, PromoCode, PromoRejection, PromoStats, ReferralPage,
    ReferralPayout, ReferralSummary, Subscription, SubscriptionWithDetails, TopReferrer,
    TransactionType, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("insufficient funds: balance {balance:.2}, required {required:.2}")]
    InsufficientFunds { balance: f64, required: f64 },
    #[error("{0}")]
    PromoRejected(PromoRejection),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage unavailable")]
    Unavailable,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Typed access to users, catalog, balances and promo codes.
///
/// Every balance mutation writes its ledger row in the same transaction.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the user, creating it on first contact. `referrer` is only
    /// recorded for newly created users.
    async fn get_or_create_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        referrer: Option<i64>,
    ) -> Result<User, StoreError>;

    async fn get_user(&self, telegram_id: i64) -> Result<Option<User>, StoreError>;

    /// Looks up by numeric telegram id or by username (leading `@` optional).
    async fn find_user(&self, query: &str) -> Result<Option<User>, StoreError>;

    async fn list_user_ids(&self) -> Result<Vec<i64>, StoreError>;

    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    async fn get_product(&self, id: i64) -> Result<Option<Product>, StoreError>;

    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError>;

    async fn list_subscriptions(
        &self,
        telegram_id: i64,
    ) -> Result<Vec<SubscriptionWithDetails>, StoreError>;

    /// Adds `amount` to the balance and returns the new balance.
    async fn credit(
        &self,
        telegram_id: i64,
        amount: f64,
        kind: TransactionType,
    ) -> Result<f64, StoreError>;

    /// Subtracts `amount`, failing with `InsufficientFunds` without side effects.
    async fn debit(
        &self,
        telegram_id: i64,
        amount: f64,
        kind: TransactionType,
    ) -> Result<f64, StoreError>;

    /// Credits a top-up and pays the inviter's bonus in one transaction.
    async fn top_up_with_referral(
        &self,
        telegram_id: i64,
        amount: f64,
    ) -> Result<Option<ReferralPayout>, StoreError>;

    async fn create_promo(
        &self,
        code: &str,
        amount: f64,
        max_activations: i32,
    ) -> Result<PromoCode, StoreError>;

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>, StoreError>;

    async fn list_promos(&self) -> Result<Vec<PromoCode>, StoreError>;

    /// Returns false when no active code matched.
    async fn deactivate_promo(&self, code: &str) -> Result<bool, StoreError>;

    /// Redeems a code for a user and credits its amount.
    async fn activate_promo(&self, telegram_id: i64, code: &str) -> Result<PromoCode, StoreError>;

    async fn promo_stats(&self) -> Result<Vec<PromoStats>, StoreError>;

    async fn referral_summary(&self, telegram_id: i64) -> Result<ReferralSummary, StoreError>;

    async fn referrals_page(
        &self,
        telegram_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ReferralPage, StoreError>;

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, StoreError>;

    async fn admin_stats(&self) -> Result<AdminStats, StoreError>;
}
