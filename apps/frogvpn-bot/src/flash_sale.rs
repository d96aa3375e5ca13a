//! Time-boxed store-wide discount and its announcement job.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use frogvpn_db::Store;
use tracing::{info, warn};

use crate::broadcast::{Broadcaster, JobHandle, JobKind};
use crate::error::{BotError, BotResult};
use crate::transport::{Button, Content, Keyboard, MediaSource, OutgoingMessage};
use crate::triggers::CallbackData;

pub const MAX_PERCENT: u32 = 90;
pub const MAX_HOURS: u32 = 24 * 365;
pub const PERCENT_CHOICES: [u32; 6] = [20, 30, 40, 50, 60, 70];
pub const HOUR_CHOICES: [u32; 6] = [1, 2, 3, 6, 12, 24];
pub const QUICK_PRESETS: [(u32, u32); 4] = [(50, 6), (50, 24), (30, 12), (25, 48)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sale {
    pub percent: u32,
    pub ends_at: DateTime<Utc>,
}

impl Sale {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.percent > 0 && now < self.ends_at
    }
}

/// Process-wide sale. Readers see either the whole old sale or the whole new one.
#[derive(Debug, Default)]
pub struct FlashSale {
    current: RwLock<Option<Sale>>,
}

impl FlashSale {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_at(&self, percent: u32, hours: u32, now: DateTime<Utc>) -> BotResult<Sale> {
        validate(percent, hours)?;
        let ends_at = now
            .checked_add_signed(Duration::hours(hours as i64))
            .ok_or_else(|| BotError::invalid("sale end is out of range"))?;
        let sale = Sale { percent, ends_at };
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(sale);
        Ok(sale)
    }

    pub fn start(&self, percent: u32, hours: u32) -> BotResult<Sale> {
        self.start_at(percent, hours, Utc::now())
    }

    /// Puts back a sale captured earlier with [`FlashSale::active`].
    pub fn restore(&self, previous: Option<Sale>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = previous;
    }

    /// Ends the sale, returning it if one was active.
    pub fn clear(&self) -> Option<Sale> {
        let now = Utc::now();
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .filter(|sale| sale.is_active_at(now))
    }

    pub fn active_at(&self, now: DateTime<Utc>) -> Option<Sale> {
        let current = *self.current.read().unwrap_or_else(PoisonError::into_inner);
        current.filter(|sale| sale.is_active_at(now))
    }

    pub fn active(&self) -> Option<Sale> {
        self.active_at(Utc::now())
    }

    pub fn discount_at(&self, now: DateTime<Utc>) -> u32 {
        self.active_at(now).map(|sale| sale.percent).unwrap_or(0)
    }

    pub fn apply_at(&self, price: f64, now: DateTime<Utc>) -> f64 {
        apply_discount(price, self.discount_at(now))
    }

    pub fn apply(&self, price: f64) -> f64 {
        self.apply_at(price, Utc::now())
    }
}

pub fn apply_discount(price: f64, percent: u32) -> f64 {
    price * (100 - percent.min(100)) as f64 / 100.0
}

pub fn validate(percent: u32, hours: u32) -> BotResult<()> {
    if !(1..=MAX_PERCENT).contains(&percent) {
        return Err(BotError::invalid(format!(
            "discount must be between 1 and {}%",
            MAX_PERCENT
        )));
    }
    if !(1..=MAX_HOURS).contains(&hours) {
        return Err(BotError::invalid(format!(
            "duration must be between 1 and {} hours",
            MAX_HOURS
        )));
    }
    Ok(())
}

/// Parses the arguments of `/flashsale <percent> <hours>`.
pub fn parse_args(args: &str) -> BotResult<(u32, u32)> {
    let mut parts = args.split_whitespace();
    let (Some(percent), Some(hours), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(BotError::invalid("usage: /flashsale <percent> <hours>"));
    };
    let percent = percent
        .trim_end_matches('%')
        .parse()
        .map_err(|_| BotError::invalid("percent must be a number"))?;
    let hours = hours
        .parse()
        .map_err(|_| BotError::invalid("hours must be a number"))?;
    validate(percent, hours)?;
    Ok((percent, hours))
}

fn hours_label(hours: u32) -> String {
    if hours == 1 {
        "1 hour".to_string()
    } else {
        format!("{} hours", hours)
    }
}

/// Promotional card sent to every user when a sale starts.
pub fn sale_card(sale: &Sale, hours: u32, base_price: f64, image_url: &str) -> OutgoingMessage {
    let caption = format!(
        "🚨 <b>SALE! -{}% OFF</b>\n\n\
         Only for the next <b>{}</b>!\n\
         Every plan is cheaper right now.\n\n\
         💰 1 month: <s>{:.0} ₽</s> → <b>{:.0} ₽</b>\n\n\
         ⏳ Ends: <b>{}</b>",
        sale.percent,
        hours_label(hours),
        base_price,
        apply_discount(base_price, sale.percent),
        sale.ends_at.format("%d.%m.%Y %H:%M UTC"),
    );
    OutgoingMessage::new(Content::Photo {
        file: MediaSource::Url(image_url.to_string()),
        caption: Some(caption),
    })
    .with_keyboard(Keyboard::new(vec![
        vec![Button::callback("💎 Choose a plan", CallbackData::Tariffs.encode())],
        vec![Button::callback("⏰ Renew subscription", CallbackData::MySubs.encode())],
        vec![Button::callback("❌ Close", CallbackData::DeleteMsg.encode())],
    ]))
}

#[derive(Debug, Clone)]
pub struct FlashSaleSettings {
    pub image_url: String,
    pub base_price: f64,
}

/// Starts a sale and announces it to every user through the shared broadcaster.
///
/// Refused with `AlreadyRunning` while another job is active, in which case
/// the sale is not changed. If the user list cannot be read the previous
/// sale, if any, is put back and nothing is sent.
pub async fn launch(
    broadcaster: &Broadcaster,
    store: &dyn Store,
    flash: &FlashSale,
    settings: &FlashSaleSettings,
    initiator: i64,
    percent: u32,
    hours: u32,
) -> BotResult<(Sale, JobHandle)> {
    validate(percent, hours)?;
    let reservation = broadcaster.reserve()?;
    let previous = flash.active();
    let sale = flash.start(percent, hours)?;
    info!(
        "Flash sale -{}% for {}h started by {}, ends {}",
        percent, hours, initiator, sale.ends_at
    );

    let card = sale_card(&sale, hours, settings.base_price, &settings.image_url);
    match reservation
        .launch_to_all(store, JobKind::FlashSale, initiator, card)
        .await
    {
        Ok(job) => Ok((sale, job)),
        Err(e) => {
            warn!("Flash sale announcement failed, rolling back: {}", e);
            flash.restore(previous);
            Err(e)
        }
    }
}
