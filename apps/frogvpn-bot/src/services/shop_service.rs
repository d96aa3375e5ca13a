use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};
use frogvpn_db::models::{NewSubscription, Product, Subscription, TransactionType};
use frogvpn_db::{Store, StoreError};
use tracing::{error, info, warn};

use crate::error::{BotError, BotResult};
use crate::flash_sale::FlashSale;
use crate::provider::VpnProvider;

/// Result of paying for a plan from the balance.
#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    Purchased {
        product: Product,
        months: u32,
        price: f64,
        subscription: Subscription,
        balance: f64,
    },
    InsufficientFunds {
        balance: f64,
        price: f64,
    },
    /// The debit went through but the key could not be created; the price
    /// was credited back.
    Refunded {
        price: f64,
    },
}

#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub product: Product,
    pub subscription: Subscription,
}

#[derive(Clone)]
pub struct ShopService {
    store: Arc<dyn Store>,
    provider: Arc<dyn VpnProvider>,
    flash: Arc<FlashSale>,
}

impl ShopService {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn VpnProvider>, flash: Arc<FlashSale>) -> Self {
        Self {
            store,
            provider,
            flash,
        }
    }

    async fn product(&self, product_id: i64) -> BotResult<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| BotError::invalid(format!("unknown product {}", product_id)))
    }

    /// Plan price with the running flash sale applied.
    pub async fn quote(&self, product_id: i64, months: u32) -> BotResult<(Product, f64)> {
        let product = self.product(product_id).await?;
        let plan = product
            .plan(months)
            .ok_or_else(|| BotError::invalid(format!("no {}-month plan", months)))?;
        let price = self.flash.apply(plan.price);
        Ok((product, price))
    }

    pub async fn purchase(
        &self,
        telegram_id: i64,
        product_id: i64,
        months: u32,
    ) -> BotResult<PurchaseOutcome> {
        let (product, price) = self.quote(product_id, months).await?;

        let balance = match self
            .store
            .debit(telegram_id, price, TransactionType::Purchase)
            .await
        {
            Ok(balance) => balance,
            Err(StoreError::InsufficientFunds { balance, .. }) => {
                return Ok(PurchaseOutcome::InsufficientFunds { balance, price });
            }
            Err(e) => return Err(e.into()),
        };

        let expires_at = Utc::now()
            .checked_add_months(Months::new(months))
            .ok_or_else(|| BotError::invalid("plan length out of range"))?;

        match self.provision("tg", telegram_id, &product, expires_at).await {
            Ok(subscription) => {
                info!(
                    "User {} bought {} for {} months at {:.2}",
                    telegram_id,
                    product.name,
                    months,
                    price
                );
                Ok(PurchaseOutcome::Purchased {
                    product,
                    months,
                    price,
                    subscription,
                    balance,
                })
            }
            Err(e) => {
                warn!(
                    "Purchase by {} failed after debit, refunding {:.2}: {}",
                    telegram_id, price, e
                );
                if let Err(refund_err) = self
                    .store
                    .credit(telegram_id, price, TransactionType::Refund)
                    .await
                {
                    error!(
                        "Refund of {:.2} to {} failed, manual correction needed: {}",
                        price, telegram_id, refund_err
                    );
                    return Err(refund_err.into());
                }
                info!("Refunded {:.2} to {}", price, telegram_id);
                Ok(PurchaseOutcome::Refunded { price })
            }
        }
    }

    /// Issues a free key for `days` to an existing user.
    pub async fn gift(&self, telegram_id: i64, product_id: i64, days: u32) -> BotResult<IssuedKey> {
        if self.store.get_user(telegram_id).await?.is_none() {
            return Err(BotError::invalid(format!("user {} not found", telegram_id)));
        }
        let product = self.product(product_id).await?;
        let expires_at = Utc::now() + Duration::days(days as i64);
        let subscription = self
            .provision("gift_tg", telegram_id, &product, expires_at)
            .await?;
        info!(
            "Issued {} for {} days to {}",
            product.name, days, telegram_id
        );
        Ok(IssuedKey {
            product,
            subscription,
        })
    }

    async fn provision(
        &self,
        prefix: &str,
        telegram_id: i64,
        product: &Product,
        expires_at: DateTime<Utc>,
    ) -> BotResult<Subscription> {
        let username = format!("{}_{}_{}", prefix, telegram_id, Utc::now().timestamp());
        let key_string = self
            .provider
            .create_user(&username, &product.marzban_tag, expires_at)
            .await?;
        let subscription = self
            .store
            .create_subscription(NewSubscription {
                telegram_id,
                product_id: product.id,
                key_string,
                expires_at,
            })
            .await?;
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockVpnProvider;
    use frogvpn_db::MemoryStore;

    struct Fixture {
        shop: ShopService,
        store: Arc<MemoryStore>,
        provider: Arc<MockVpnProvider>,
        flash: Arc<FlashSale>,
    }

    async fn fixture(balance: f64) -> Fixture {
        let store = Arc::new(MemoryStore::with_default_catalog());
        store.get_or_create_user(42, Some("buyer"), None).await.unwrap();
        if balance > 0.0 {
            store.credit(42, balance, TransactionType::TopUp).await.unwrap();
        }
        let provider = Arc::new(MockVpnProvider::new());
        let flash = Arc::new(FlashSale::new());
        Fixture {
            shop: ShopService::new(store.clone(), provider.clone(), flash.clone()),
            store,
            provider,
            flash,
        }
    }

    #[tokio::test]
    async fn purchase_debits_and_provisions() {
        let f = fixture(1000.0).await;
        let outcome = f.shop.purchase(42, 1, 1).await.unwrap();
        let PurchaseOutcome::Purchased { price, balance, subscription, .. } = outcome else {
            panic!("expected a purchase, got {:?}", outcome);
        };
        assert_eq!(price, 450.0);
        assert_eq!(balance, 550.0);
        assert!(subscription.key_string.starts_with("vless://"));

        let created = f.provider.created();
        assert_eq!(created.len(), 1);
        assert!(created[0].0.starts_with("tg_42_"));
        assert_eq!(created[0].1, "VLESS_NL");
    }

    #[tokio::test]
    async fn shortfall_leaves_everything_untouched() {
        let f = fixture(100.0).await;
        let outcome = f.shop.purchase(42, 1, 3).await.unwrap();
        assert!(matches!(
            outcome,
            PurchaseOutcome::InsufficientFunds { balance, price } if balance == 100.0 && price == 1350.0
        ));
        assert!(f.provider.created().is_empty());
        assert_eq!(f.store.ledger(42), vec![(TransactionType::TopUp, 100.0)]);
    }

    #[tokio::test]
    async fn failed_provisioning_is_refunded() {
        let f = fixture(500.0).await;
        f.provider.set_fail_provisioning(true);

        let outcome = f.shop.purchase(42, 1, 1).await.unwrap();
        assert!(matches!(outcome, PurchaseOutcome::Refunded { price } if price == 450.0));
        assert_eq!(f.store.get_user(42).await.unwrap().unwrap().balance, 500.0);
        assert_eq!(
            f.store.ledger(42),
            vec![
                (TransactionType::TopUp, 500.0),
                (TransactionType::Purchase, 450.0),
                (TransactionType::Refund, 450.0),
            ]
        );
        assert_eq!(f.store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn flash_sale_lowers_the_price() {
        let f = fixture(1000.0).await;
        f.flash.start(50, 6).unwrap();
        let (_, price) = f.shop.quote(1, 1).await.unwrap();
        assert_eq!(price, 225.0);
        let (_, price) = f.shop.quote(1, 12).await.unwrap();
        assert_eq!(price, 2160.0);
    }

    #[tokio::test]
    async fn unknown_plan_is_invalid_input() {
        let f = fixture(1000.0).await;
        assert!(matches!(
            f.shop.purchase(42, 1, 2).await,
            Err(BotError::UserInputInvalid(_))
        ));
        assert!(matches!(
            f.shop.purchase(42, 99, 1).await,
            Err(BotError::UserInputInvalid(_))
        ));
    }

    #[tokio::test]
    async fn gift_requires_a_known_user() {
        let f = fixture(0.0).await;
        assert!(matches!(
            f.shop.gift(777, 1, 30).await,
            Err(BotError::UserInputInvalid(_))
        ));
        assert!(f.provider.created().is_empty());

        let issued = f.shop.gift(42, 3, 30).await.unwrap();
        assert_eq!(issued.product.marzban_tag, "VLESS_FI");
        assert!(f.provider.created()[0].0.starts_with("gift_tg_42_"));
        assert_eq!(f.store.subscription_count(), 1);
    }
}
