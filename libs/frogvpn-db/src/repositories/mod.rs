pub mod promo_repo;
pub mod subscription_repo;
pub mod user_repo;

pub use promo_repo::PromoRepository;
pub use subscription_repo::SubscriptionRepository;
pub use user_repo::UserRepository;
