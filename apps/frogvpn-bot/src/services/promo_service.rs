use std::sync::Arc;

use frogvpn_db::models::{PromoCode, PromoRejection, PromoStats};
use frogvpn_db::{Store, StoreError};
use tracing::info;

use crate::error::{BotError, BotResult};

pub const CODE_MIN_LEN: usize = 3;
pub const CODE_MAX_LEN: usize = 20;

#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    Credited { code: String, amount: f64 },
    Rejected(PromoRejection),
}

/// Code typed by a user. Only the minimum length is checked here; the
/// store decides whether it exists.
pub fn normalize_entry(text: &str) -> BotResult<String> {
    let code = text.trim();
    if code.chars().count() < CODE_MIN_LEN {
        return Err(BotError::invalid("promo code is too short"));
    }
    Ok(code.to_uppercase())
}

/// Code for a new promo, 3 to 20 characters without spaces.
pub fn parse_new_code(text: &str) -> BotResult<String> {
    let code = text.trim();
    let len = code.chars().count();
    if !(CODE_MIN_LEN..=CODE_MAX_LEN).contains(&len) || code.contains(char::is_whitespace) {
        return Err(BotError::invalid(format!(
            "code must be {} to {} characters without spaces",
            CODE_MIN_LEN, CODE_MAX_LEN
        )));
    }
    Ok(code.to_uppercase())
}

pub fn parse_amount(text: &str) -> BotResult<f64> {
    match text.trim().replace(',', ".").parse::<f64>() {
        Ok(amount) if amount.is_finite() && amount > 0.0 => Ok(amount),
        _ => Err(BotError::invalid("amount must be a positive number")),
    }
}

pub fn parse_activations(text: &str) -> BotResult<i32> {
    match text.trim().parse::<i32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(BotError::invalid("activations must be a positive whole number")),
    }
}

#[derive(Clone)]
pub struct PromoService {
    store: Arc<dyn Store>,
}

impl PromoService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn redeem(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        text: &str,
    ) -> BotResult<RedeemOutcome> {
        let code = normalize_entry(text)?;
        self.store
            .get_or_create_user(telegram_id, username, None)
            .await?;
        match self.store.activate_promo(telegram_id, &code).await {
            Ok(promo) => {
                info!("User {} redeemed {} for {:.0}", telegram_id, promo.code, promo.amount);
                Ok(RedeemOutcome::Credited {
                    code: promo.code,
                    amount: promo.amount,
                })
            }
            Err(StoreError::PromoRejected(reason)) => Ok(RedeemOutcome::Rejected(reason)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn is_taken(&self, code: &str) -> BotResult<bool> {
        Ok(self.store.get_promo(code).await?.is_some())
    }

    pub async fn create(&self, code: &str, amount: f64, activations: i32) -> BotResult<PromoCode> {
        match self.store.create_promo(code, amount, activations).await {
            Ok(promo) => {
                info!(
                    "Promo {} created: {:.0} x {}",
                    promo.code, promo.amount, promo.max_activations
                );
                Ok(promo)
            }
            Err(StoreError::Conflict(_)) => {
                Err(BotError::invalid(format!("promo {} already exists", code)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> BotResult<Vec<PromoCode>> {
        Ok(self.store.list_promos().await?)
    }

    pub async fn deactivate(&self, text: &str) -> BotResult<bool> {
        let code = text.trim().to_uppercase();
        let removed = self.store.deactivate_promo(&code).await?;
        if removed {
            info!("Promo {} deactivated", code);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> BotResult<Vec<PromoStats>> {
        Ok(self.store.promo_stats().await?)
    }
}
