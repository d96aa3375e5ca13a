use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub country_flag: String,
    pub base_price: f64,
    pub marzban_tag: String,
    pub description: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingPlan {
    pub months: u32,
    pub discount_percent: u32,
    pub price: f64,
}

/// Month counts offered for every product, with their long-term discounts.
pub const PLAN_MONTHS: [(u32, u32); 4] = [(1, 0), (3, 0), (6, 10), (12, 20)];

impl Product {
    pub fn plans(&self) -> Vec<PricingPlan> {
        PLAN_MONTHS
            .iter()
            .map(|&(months, discount_percent)| PricingPlan {
                months,
                discount_percent,
                price: self.base_price * months as f64 * (100 - discount_percent) as f64 / 100.0,
            })
            .collect()
    }

    pub fn plan(&self, months: u32) -> Option<PricingPlan> {
        self.plans().into_iter().find(|p| p.months == months)
    }

    pub fn title(&self) -> String {
        format!("{} {}", self.country_flag, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub key_string: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionWithDetails {
    #[sqlx(flatten)]
    pub subscription: Subscription,
    pub product_name: String,
    pub country_flag: String,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub telegram_id: i64,
    pub product_id: i64,
    pub key_string: String,
    pub expires_at: DateTime<Utc>,
}

/// Ledger entry kinds, stored as text in `transactions.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    TopUp,
    Purchase,
    Refund,
    ReferralBonus,
    Promo,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::TopUp => "top_up",
            TransactionType::Purchase => "purchase",
            TransactionType::Refund => "refund",
            TransactionType::ReferralBonus => "referral_bonus",
            TransactionType::Promo => "promo",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(base_price: f64) -> Product {
        Product {
            id: 1,
            name: "Netherlands".into(),
            country_flag: "🇳🇱".into(),
            base_price,
            marzban_tag: "VLESS_NL".into(),
            description: String::new(),
            sort_order: 1,
        }
    }

    #[test]
    fn long_plans_are_discounted() {
        let plans = product(450.0).plans();
        assert_eq!(plans.len(), 4);
        assert_eq!(plans[0].price, 450.0);
        assert_eq!(plans[1].price, 1350.0);
        assert_eq!(plans[2].price, 2430.0);
        assert_eq!(plans[3].price, 4320.0);
    }

    #[test]
    fn unknown_plan_is_none() {
        assert!(product(450.0).plan(2).is_none());
        assert_eq!(product(450.0).plan(6).map(|p| p.discount_percent), Some(10));
    }
}
