use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};

use crate::models::stats::{referral_bonus, total_pages};
use crate::models::{
    AdminStats, NewSubscription, Product, PromoCode, PromoRejection, PromoStats, ReferralEntry,
    ReferralPage, ReferralPayout, ReferralSummary, Subscription, SubscriptionWithDetails,
    TopReferrer, TransactionType, User,
};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone)]
struct LedgerRow {
    telegram_id: i64,
    amount: f64,
    kind: TransactionType,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<i64, User>,
    products: Vec<Product>,
    subscriptions: Vec<Subscription>,
    ledger: Vec<LedgerRow>,
    promos: HashMap<String, PromoCode>,
    activations: HashSet<(i64, i64)>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, telegram_id: i64, amount: f64, kind: TransactionType) {
        self.ledger.push(LedgerRow {
            telegram_id,
            amount,
            kind,
            created_at: Utc::now(),
        });
    }
}

/// In-process [`Store`] for local mode and tests.
///
/// All operations run under one lock, which makes each call atomic the same
/// way a database transaction would.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with the catalog the migrations seed.
    pub fn with_default_catalog() -> Self {
        let store = Self::new();
        for (name, flag, price, tag, description) in [
            ("Netherlands", "🇳🇱", 450.0, "VLESS_NL", "Amsterdam, 1 Gbit/s"),
            ("Germany", "🇩🇪", 450.0, "VLESS_DE", "Frankfurt, 1 Gbit/s"),
            ("Finland", "🇫🇮", 400.0, "VLESS_FI", "Helsinki, 1 Gbit/s"),
        ] {
            store.add_product(name, flag, price, tag, description);
        }
        store
    }

    pub fn add_product(
        &self,
        name: &str,
        flag: &str,
        base_price: f64,
        tag: &str,
        description: &str,
    ) -> Product {
        let mut inner = self.lock();
        let id = inner.products.len() as i64 + 1;
        let product = Product {
            id,
            name: name.to_string(),
            country_flag: flag.to_string(),
            base_price,
            marzban_tag: tag.to_string(),
            description: description.to_string(),
            sort_order: id as i32,
        };
        inner.products.push(product.clone());
        product
    }

    /// Makes every subsequent call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Ledger entries of a user, oldest first.
    pub fn ledger(&self, telegram_id: i64) -> Vec<(TransactionType, f64)> {
        self.lock()
            .ledger
            .iter()
            .filter(|row| row.telegram_id == telegram_id)
            .map(|row| (row.kind, row.amount))
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.lock())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_or_create_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        referrer: Option<i64>,
    ) -> Result<User, StoreError> {
        let mut inner = self.guard()?;
        if let Some(user) = inner.users.get_mut(&telegram_id) {
            if let Some(name) = username {
                user.username = Some(name.to_string());
            }
            return Ok(user.clone());
        }

        let referrer = referrer.filter(|r| *r != telegram_id && inner.users.contains_key(r));
        let id = inner.next_id();
        let user = User {
            id,
            telegram_id,
            username: username.map(str::to_string),
            balance: 0.0,
            referrer_id: referrer,
            total_ref_earnings: 0.0,
            created_at: Utc::now(),
        };
        inner.users.insert(telegram_id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, telegram_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.guard()?.users.get(&telegram_id).cloned())
    }

    async fn find_user(&self, query: &str) -> Result<Option<User>, StoreError> {
        let inner = self.guard()?;
        let query = query.trim();
        if let Ok(id) = query.parse::<i64>() {
            return Ok(inner.users.get(&id).cloned());
        }
        let name = query.trim_start_matches('@');
        Ok(inner
            .users
            .values()
            .find(|u| {
                u.username
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .cloned())
    }

    async fn list_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        let inner = self.guard()?;
        let mut users: Vec<&User> = inner.users.values().collect();
        users.sort_by_key(|u| u.id);
        Ok(users.into_iter().map(|u| u.telegram_id).collect())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.guard()?.products.clone())
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>, StoreError> {
        Ok(self.guard()?.products.iter().find(|p| p.id == id).cloned())
    }

    async fn create_subscription(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        let mut inner = self.guard()?;
        let user_id = inner
            .users
            .get(&new.telegram_id)
            .map(|u| u.id)
            .ok_or(StoreError::NotFound)?;
        let id = inner.next_id();
        let sub = Subscription {
            id,
            user_id,
            product_id: new.product_id,
            key_string: new.key_string,
            expires_at: new.expires_at,
            is_active: true,
            created_at: Utc::now(),
        };
        inner.subscriptions.push(sub.clone());
        Ok(sub)
    }

    async fn list_subscriptions(
        &self,
        telegram_id: i64,
    ) -> Result<Vec<SubscriptionWithDetails>, StoreError> {
        let inner = self.guard()?;
        let Some(user_id) = inner.users.get(&telegram_id).map(|u| u.id) else {
            return Ok(Vec::new());
        };
        let mut subs: Vec<SubscriptionWithDetails> = inner
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter_map(|s| {
                let product = inner.products.iter().find(|p| p.id == s.product_id)?;
                Some(SubscriptionWithDetails {
                    subscription: s.clone(),
                    product_name: product.name.clone(),
                    country_flag: product.country_flag.clone(),
                })
            })
            .collect();
        subs.sort_by(|a, b| b.subscription.expires_at.cmp(&a.subscription.expires_at));
        Ok(subs)
    }

    async fn credit(
        &self,
        telegram_id: i64,
        amount: f64,
        kind: TransactionType,
    ) -> Result<f64, StoreError> {
        let mut inner = self.guard()?;
        let user = inner.users.get_mut(&telegram_id).ok_or(StoreError::NotFound)?;
        user.balance += amount;
        let balance = user.balance;
        inner.record(telegram_id, amount, kind);
        Ok(balance)
    }

    async fn debit(
        &self,
        telegram_id: i64,
        amount: f64,
        kind: TransactionType,
    ) -> Result<f64, StoreError> {
        let mut inner = self.guard()?;
        let user = inner.users.get_mut(&telegram_id).ok_or(StoreError::NotFound)?;
        if user.balance < amount {
            return Err(StoreError::InsufficientFunds {
                balance: user.balance,
                required: amount,
            });
        }
        user.balance -= amount;
        let balance = user.balance;
        inner.record(telegram_id, amount, kind);
        Ok(balance)
    }

    async fn top_up_with_referral(
        &self,
        telegram_id: i64,
        amount: f64,
    ) -> Result<Option<ReferralPayout>, StoreError> {
        let mut inner = self.guard()?;
        let user = inner.users.get_mut(&telegram_id).ok_or(StoreError::NotFound)?;
        user.balance += amount;
        let referrer = user.referrer_id;
        inner.record(telegram_id, amount, TransactionType::TopUp);

        let Some(referrer_tg) = referrer else {
            return Ok(None);
        };
        let bonus = referral_bonus(amount);
        let Some(referrer) = inner.users.get_mut(&referrer_tg) else {
            return Ok(None);
        };
        referrer.balance += bonus;
        referrer.total_ref_earnings += bonus;
        inner.record(referrer_tg, bonus, TransactionType::ReferralBonus);
        Ok(Some(ReferralPayout {
            referrer_telegram_id: referrer_tg,
            bonus,
        }))
    }

    async fn create_promo(
        &self,
        code: &str,
        amount: f64,
        max_activations: i32,
    ) -> Result<PromoCode, StoreError> {
        let mut inner = self.guard()?;
        if inner.promos.contains_key(code) {
            return Err(StoreError::Conflict(format!(
                "promo code {} already exists",
                code
            )));
        }
        let id = inner.next_id();
        let promo = PromoCode {
            id,
            code: code.to_string(),
            amount,
            max_activations,
            activations_used: 0,
            is_active: true,
            created_at: Utc::now(),
        };
        inner.promos.insert(code.to_string(), promo.clone());
        Ok(promo)
    }

    async fn get_promo(&self, code: &str) -> Result<Option<PromoCode>, StoreError> {
        Ok(self.guard()?.promos.get(code).cloned())
    }

    async fn list_promos(&self) -> Result<Vec<PromoCode>, StoreError> {
        let inner = self.guard()?;
        let mut promos: Vec<PromoCode> = inner.promos.values().cloned().collect();
        promos.sort_by(|a, b| {
            b.is_active
                .cmp(&a.is_active)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(promos)
    }

    async fn deactivate_promo(&self, code: &str) -> Result<bool, StoreError> {
        let mut inner = self.guard()?;
        match inner.promos.get_mut(code) {
            Some(promo) if promo.is_active => {
                promo.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn activate_promo(&self, telegram_id: i64, code: &str) -> Result<PromoCode, StoreError> {
        let mut inner = self.guard()?;
        let promo = inner
            .promos
            .get(code)
            .cloned()
            .ok_or(StoreError::PromoRejected(PromoRejection::NotFound))?;
        if !promo.is_active {
            return Err(StoreError::PromoRejected(PromoRejection::Inactive));
        }
        if promo.is_exhausted() {
            return Err(StoreError::PromoRejected(PromoRejection::Exhausted));
        }
        if !inner.users.contains_key(&telegram_id) {
            return Err(StoreError::NotFound);
        }
        if !inner.activations.insert((promo.id, telegram_id)) {
            return Err(StoreError::PromoRejected(PromoRejection::AlreadyUsed));
        }

        let updated = {
            let stored = inner
                .promos
                .get_mut(code)
                .ok_or(StoreError::PromoRejected(PromoRejection::NotFound))?;
            stored.activations_used += 1;
            stored.clone()
        };
        if let Some(user) = inner.users.get_mut(&telegram_id) {
            user.balance += updated.amount;
        }
        inner.record(telegram_id, updated.amount, TransactionType::Promo);
        Ok(updated)
    }

    async fn promo_stats(&self) -> Result<Vec<PromoStats>, StoreError> {
        let inner = self.guard()?;
        let mut stats: Vec<PromoStats> = inner
            .promos
            .values()
            .filter(|p| p.is_active)
            .map(|p| PromoStats {
                code: p.code.clone(),
                amount: p.amount,
                max_activations: p.max_activations,
                activations_used: p.activations_used,
                total_bonus_paid: p.amount * p.activations_used as f64,
            })
            .collect();
        stats.sort_by(|a, b| b.activations_used.cmp(&a.activations_used));
        Ok(stats)
    }

    async fn referral_summary(&self, telegram_id: i64) -> Result<ReferralSummary, StoreError> {
        let inner = self.guard()?;
        let count = inner
            .users
            .values()
            .filter(|u| u.referrer_id == Some(telegram_id))
            .count() as i64;
        let earnings = inner
            .users
            .get(&telegram_id)
            .map(|u| u.total_ref_earnings)
            .unwrap_or_default();
        Ok(ReferralSummary { count, earnings })
    }

    async fn referrals_page(
        &self,
        telegram_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ReferralPage, StoreError> {
        let inner = self.guard()?;
        let mut referrals: Vec<&User> = inner
            .users
            .values()
            .filter(|u| u.referrer_id == Some(telegram_id))
            .collect();
        referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = referrals.len() as i64;
        let total_pages = total_pages(total, per_page);
        let page = page.clamp(1, total_pages);
        let items = referrals
            .into_iter()
            .skip(((page - 1) * per_page) as usize)
            .take(per_page as usize)
            .map(|u| ReferralEntry {
                telegram_id: u.telegram_id,
                username: u.username.clone(),
                created_at: u.created_at,
            })
            .collect();

        Ok(ReferralPage {
            items,
            total,
            page,
            total_pages,
        })
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, StoreError> {
        let inner = self.guard()?;
        let mut top: Vec<TopReferrer> = inner
            .users
            .values()
            .filter_map(|u| {
                let referral_count = inner
                    .users
                    .values()
                    .filter(|r| r.referrer_id == Some(u.telegram_id))
                    .count() as i64;
                (referral_count > 0).then(|| TopReferrer {
                    telegram_id: u.telegram_id,
                    username: u.username.clone(),
                    referral_count,
                    total_revenue: u.total_ref_earnings,
                })
            })
            .collect();
        top.sort_by(|a, b| {
            b.total_revenue
                .total_cmp(&a.total_revenue)
                .then(b.referral_count.cmp(&a.referral_count))
        });
        top.truncate(limit.max(0) as usize);
        Ok(top)
    }

    async fn admin_stats(&self) -> Result<AdminStats, StoreError> {
        let inner = self.guard()?;
        let now = Utc::now();
        let today = now.date_naive();
        let purchases = || {
            inner
                .ledger
                .iter()
                .filter(|row| row.kind == TransactionType::Purchase)
        };

        Ok(AdminStats {
            total_users: inner.users.len() as i64,
            new_users_today: inner
                .users
                .values()
                .filter(|u| u.created_at.date_naive() == today)
                .count() as i64,
            active_subscriptions: inner
                .subscriptions
                .iter()
                .filter(|s| s.is_active && s.expires_at > now)
                .count() as i64,
            revenue_today: purchases()
                .filter(|row| row.created_at.date_naive() == today)
                .map(|row| row.amount)
                .sum(),
            revenue_month: purchases()
                .filter(|row| {
                    row.created_at.year() == now.year() && row.created_at.month() == now.month()
                })
                .map(|row| row.amount)
                .sum(),
            revenue_all_time: purchases().map(|row| row.amount).sum(),
            total_balances: inner.users.values().map(|u| u.balance).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debit_never_goes_negative() {
        let store = MemoryStore::new();
        store.get_or_create_user(1, Some("alice"), None).await.unwrap();
        store.credit(1, 100.0, TransactionType::TopUp).await.unwrap();

        let err = store.debit(1, 150.0, TransactionType::Purchase).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds { .. }));
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, 100.0);

        let balance = store.debit(1, 60.0, TransactionType::Purchase).await.unwrap();
        assert_eq!(balance, 40.0);
        assert_eq!(
            store.ledger(1),
            vec![(TransactionType::TopUp, 100.0), (TransactionType::Purchase, 60.0)]
        );
    }

    #[tokio::test]
    async fn top_up_pays_referrer_a_quarter() {
        let store = MemoryStore::new();
        store.get_or_create_user(10, Some("inviter"), None).await.unwrap();
        let user = store.get_or_create_user(20, None, Some(10)).await.unwrap();
        assert_eq!(user.referrer_id, Some(10));

        let payout = store.top_up_with_referral(20, 400.0).await.unwrap();
        assert_eq!(
            payout,
            Some(ReferralPayout {
                referrer_telegram_id: 10,
                bonus: 100.0
            })
        );
        let inviter = store.get_user(10).await.unwrap().unwrap();
        assert_eq!(inviter.balance, 100.0);
        assert_eq!(inviter.total_ref_earnings, 100.0);
        assert_eq!(store.referral_summary(10).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn self_or_unknown_referrer_is_ignored() {
        let store = MemoryStore::new();
        let me = store.get_or_create_user(5, None, Some(5)).await.unwrap();
        assert_eq!(me.referrer_id, None);
        let other = store.get_or_create_user(6, None, Some(999)).await.unwrap();
        assert_eq!(other.referrer_id, None);
    }

    #[tokio::test]
    async fn promo_rejections() {
        let store = MemoryStore::new();
        store.get_or_create_user(1, None, None).await.unwrap();
        store.get_or_create_user(2, None, None).await.unwrap();
        store.create_promo("SPRING", 50.0, 1).await.unwrap();

        let err = store.activate_promo(1, "NOPE").await.unwrap_err();
        assert!(matches!(err, StoreError::PromoRejected(PromoRejection::NotFound)));

        let promo = store.activate_promo(1, "SPRING").await.unwrap();
        assert_eq!(promo.activations_used, 1);
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, 50.0);

        let err = store.activate_promo(1, "SPRING").await.unwrap_err();
        assert!(matches!(err, StoreError::PromoRejected(PromoRejection::Exhausted)));

        store.create_promo("TWICE", 10.0, 5).await.unwrap();
        store.activate_promo(2, "TWICE").await.unwrap();
        let err = store.activate_promo(2, "TWICE").await.unwrap_err();
        assert!(matches!(err, StoreError::PromoRejected(PromoRejection::AlreadyUsed)));

        assert!(store.deactivate_promo("TWICE").await.unwrap());
        assert!(!store.deactivate_promo("TWICE").await.unwrap());
        let err = store.activate_promo(1, "TWICE").await.unwrap_err();
        assert!(matches!(err, StoreError::PromoRejected(PromoRejection::Inactive)));
    }

    #[tokio::test]
    async fn duplicate_promo_is_a_conflict() {
        let store = MemoryStore::new();
        store.create_promo("HELLO", 10.0, 3).await.unwrap();
        let err = store.create_promo("HELLO", 20.0, 3).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn referral_pages_are_clamped() {
        let store = MemoryStore::new();
        store.get_or_create_user(1, None, None).await.unwrap();
        for id in 100..125 {
            store.get_or_create_user(id, None, Some(1)).await.unwrap();
        }
        let page = store.referrals_page(1, 9, 10).await.unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 3);
        assert_eq!(page.items.len(), 5);
    }

    #[tokio::test]
    async fn find_by_username_or_id() {
        let store = MemoryStore::new();
        store.get_or_create_user(42, Some("Frog"), None).await.unwrap();
        assert_eq!(store.find_user("@frog").await.unwrap().map(|u| u.telegram_id), Some(42));
        assert_eq!(store.find_user("42").await.unwrap().map(|u| u.telegram_id), Some(42));
        assert!(store.find_user("toad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.list_user_ids().await, Err(StoreError::Unavailable)));
        store.set_unavailable(false);
        assert!(store.list_user_ids().await.unwrap().is_empty());
    }
}
