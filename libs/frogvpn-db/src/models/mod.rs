pub mod promo;
pub mod stats;
pub mod store;
pub mod user;

pub use promo::{PromoCode, PromoRejection, PromoStats};
pub use stats::{
    AdminStats, ReferralEntry, ReferralPage, ReferralPayout, ReferralSummary, TopReferrer,
    REFERRAL_BONUS_PERCENT,
};
pub use store::{NewSubscription, PricingPlan, Product, Subscription, SubscriptionWithDetails, TransactionType};
pub use user::User;
