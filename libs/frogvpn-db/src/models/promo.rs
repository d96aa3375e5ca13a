use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
    pub id: i64,
    pub code: String,
    pub amount: f64,
    pub max_activations: i32,
    pub activations_used: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    pub fn is_exhausted(&self) -> bool {
        self.activations_used >= self.max_activations
    }

    pub fn usage_pct(&self) -> f32 {
        if self.max_activations == 0 {
            return 0.0;
        }
        (self.activations_used as f32 / self.max_activations as f32) * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoStats {
    pub code: String,
    pub amount: f64,
    pub max_activations: i32,
    pub activations_used: i32,
    pub total_bonus_paid: f64,
}

/// Why a promo code could not be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoRejection {
    NotFound,
    Inactive,
    Exhausted,
    AlreadyUsed,
}

impl fmt::Display for PromoRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PromoRejection::NotFound => "promo code not found",
            PromoRejection::Inactive => "promo code is no longer active",
            PromoRejection::Exhausted => "promo code activations are exhausted",
            PromoRejection::AlreadyUsed => "promo code was already used",
        };
        f.write_str(text)
    }
}
