use std::sync::{Arc, PoisonError, RwLock};

use frogvpn_db::Store;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::conversation::ConversationRegistry;
use crate::flash_sale::FlashSale;
use crate::provider::VpnProvider;
use crate::services::admin_service::AdminService;
use crate::services::promo_service::PromoService;
use crate::services::shop_service::ShopService;
use crate::support::{SupportBridge, TicketRegistry};
use crate::transport::Transport;
use crate::watchdog::Watchdog;

/// Everything a handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn Store>,
    pub registry: Arc<ConversationRegistry>,
    pub support: SupportBridge,
    pub broadcaster: Broadcaster,
    pub flash: Arc<FlashSale>,
    pub watchdog: Arc<Watchdog>,
    pub shop: ShopService,
    pub promos: PromoService,
    pub admin: AdminService,
    bot_username: Arc<RwLock<String>>,
}

impl AppState {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        provider: Arc<dyn VpnProvider>,
    ) -> Self {
        let flash = Arc::new(FlashSale::new());
        let support = SupportBridge::new(
            transport.clone(),
            Arc::new(TicketRegistry::new()),
            config.support.group_id,
        );
        let broadcaster = Broadcaster::new(transport.clone(), config.broadcast_settings());
        let watchdog = Arc::new(Watchdog::new(
            provider.clone(),
            transport.clone(),
            config.telegram.admin_ids.clone(),
            config.watchdog_settings(),
        ));

        Self {
            shop: ShopService::new(store.clone(), provider, flash.clone()),
            promos: PromoService::new(store.clone()),
            admin: AdminService::new(store.clone()),
            config: Arc::new(config),
            transport,
            store,
            registry: Arc::new(ConversationRegistry::new()),
            support,
            broadcaster,
            flash,
            watchdog,
            bot_username: Arc::new(RwLock::new("frogvpn_bot".to_string())),
        }
    }

    pub fn is_staff(&self, telegram_id: i64) -> bool {
        self.config.telegram.admin_ids.contains(&telegram_id)
    }

    pub fn bot_username(&self) -> String {
        self.bot_username
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_bot_username(&self, username: &str) {
        *self
            .bot_username
            .write()
            .unwrap_or_else(PoisonError::into_inner) = username.to_string();
    }

    pub fn referral_link(&self, telegram_id: i64) -> String {
        format!("https://t.me/{}?start={}", self.bot_username(), telegram_id)
    }
}
