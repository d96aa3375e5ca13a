pub mod admin_service;
pub mod promo_service;
pub mod shop_service;
