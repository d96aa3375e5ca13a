use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_users: i64,
    pub new_users_today: i64,
    pub active_subscriptions: i64,
    pub revenue_today: f64,
    pub revenue_month: f64,
    pub revenue_all_time: f64,
    /// Sum of every user balance.
    pub total_balances: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopReferrer {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub referral_count: i64,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferralEntry {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferralPage {
    pub items: Vec<ReferralEntry>,
    pub total: i64,
    pub page: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferralSummary {
    pub count: i64,
    pub earnings: f64,
}

/// Bonus paid to an inviter as part of a top-up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferralPayout {
    pub referrer_telegram_id: i64,
    pub bonus: f64,
}

pub const REFERRAL_BONUS_PERCENT: f64 = 25.0;

pub fn referral_bonus(amount: f64) -> f64 {
    amount * REFERRAL_BONUS_PERCENT / 100.0
}

pub fn total_pages(total: i64, per_page: u32) -> u32 {
    if per_page == 0 || total <= 0 {
        return 1;
    }
    ((total as u64).div_ceil(per_page as u64)) as u32
}
