use std::sync::Arc;

use frogvpn_db::models::{AdminStats, ReferralPayout, SubscriptionWithDetails, TopReferrer, User};
use frogvpn_db::Store;
use tracing::info;

use crate::error::{BotError, BotResult};
use crate::services::promo_service::parse_amount;

pub const TOP_REFERRERS: i64 = 10;

#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user: User,
    pub subscriptions: Vec<SubscriptionWithDetails>,
}

#[derive(Debug, Clone)]
pub struct TopUp {
    pub balance: f64,
    pub payout: Option<ReferralPayout>,
}

/// Parses `/addbal <telegram id> <amount>`.
pub fn parse_addbal_args(args: &str) -> BotResult<(i64, f64)> {
    let mut parts = args.split_whitespace();
    let (Some(id), Some(amount), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(BotError::invalid("usage: /addbal <id> <amount>"));
    };
    let id = id
        .parse()
        .map_err(|_| BotError::invalid("telegram id must be a number"))?;
    Ok((id, parse_amount(amount)?))
}

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn Store>,
}

impl AdminService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn stats(&self) -> BotResult<AdminStats> {
        Ok(self.store.admin_stats().await?)
    }

    pub async fn find(&self, query: &str) -> BotResult<Option<UserProfile>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BotError::invalid("empty search query"));
        }
        let Some(user) = self.store.find_user(query).await? else {
            return Ok(None);
        };
        let subscriptions = self.store.list_subscriptions(user.telegram_id).await?;
        Ok(Some(UserProfile {
            user,
            subscriptions,
        }))
    }

    /// Credits a manual top-up; the inviter, if any, earns the referral bonus.
    pub async fn add_balance(&self, telegram_id: i64, amount: f64) -> BotResult<TopUp> {
        if self.store.get_user(telegram_id).await?.is_none() {
            return Err(BotError::invalid(format!("user {} not found", telegram_id)));
        }
        let payout = self.store.top_up_with_referral(telegram_id, amount).await?;
        let balance = self
            .store
            .get_user(telegram_id)
            .await?
            .map(|u| u.balance)
            .unwrap_or_default();
        info!("Manual top-up of {:.0} for {}", amount, telegram_id);
        Ok(TopUp { balance, payout })
    }

    pub async fn top_referrers(&self) -> BotResult<Vec<TopReferrer>> {
        Ok(self.store.top_referrers(TOP_REFERRERS).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frogvpn_db::MemoryStore;

    #[test]
    fn addbal_arguments() {
        assert_eq!(parse_addbal_args("123 500").unwrap(), (123, 500.0));
        assert!(parse_addbal_args("123").is_err());
        assert!(parse_addbal_args("abc 500").is_err());
        assert!(parse_addbal_args("123 -1").is_err());
        assert!(parse_addbal_args("1 2 3").is_err());
    }

    #[tokio::test]
    async fn top_up_pays_inviter() {
        let store = Arc::new(MemoryStore::new());
        store.get_or_create_user(1, Some("inviter"), None).await.unwrap();
        store.get_or_create_user(2, Some("friend"), Some(1)).await.unwrap();
        let admin = AdminService::new(store.clone());

        let top_up = admin.add_balance(2, 400.0).await.unwrap();
        assert_eq!(top_up.balance, 400.0);
        let payout = top_up.payout.unwrap();
        assert_eq!(payout.referrer_telegram_id, 1);
        assert_eq!(payout.bonus, 100.0);

        assert!(admin.add_balance(3, 10.0).await.is_err());
    }

    #[tokio::test]
    async fn find_returns_profile() {
        let store = Arc::new(MemoryStore::new());
        store.get_or_create_user(5, Some("carol"), None).await.unwrap();
        let admin = AdminService::new(store);
        let profile = admin.find("@carol").await.unwrap().unwrap();
        assert_eq!(profile.user.telegram_id, 5);
        assert!(profile.subscriptions.is_empty());
        assert!(admin.find("nobody").await.unwrap().is_none());
    }
}
