//! Storefront screens and the user side of support.

use chrono::Utc;
use frogvpn_db::models::{PromoRejection, ReferralPage, REFERRAL_BONUS_PERCENT};
use tracing::info;

use super::{say, show, Screen};
use crate::bot::keyboards;
use crate::error::{BotError, BotResult};
use crate::event::{Actor, InboundEvent};
use crate::services::promo_service::RedeemOutcome;
use crate::services::shop_service::PurchaseOutcome;
use crate::state::AppState;
use crate::transport::{escape_html, OutgoingMessage};

pub const REFERRALS_PER_PAGE: u32 = 10;

fn sale_banner(state: &AppState) -> String {
    match state.flash.active() {
        Some(sale) => format!(
            "\n\n🔥 <b>SALE -{}%</b> until {}",
            sale.percent,
            sale.ends_at.format("%d.%m %H:%M UTC")
        ),
        None => String::new(),
    }
}

async fn main_menu_message(state: &AppState, actor: &Actor) -> BotResult<OutgoingMessage> {
    let user = state
        .store
        .get_or_create_user(actor.id, actor.username.as_deref(), None)
        .await?;
    let text = format!(
        "🐸 <b>FrogVPN</b>\n\nHi, {}!\n💰 Balance: <b>{:.0} ₽</b>{}",
        escape_html(&actor.display_name()),
        user.balance,
        sale_banner(state)
    );
    Ok(OutgoingMessage::text(text).with_keyboard(keyboards::main_menu()))
}

/// `/start [referrer]`.
pub async fn start(state: &AppState, event: &InboundEvent, args: &str) -> BotResult<()> {
    let actor = &event.sender;
    let referrer = args.trim().parse::<i64>().ok().filter(|id| *id != actor.id);
    let existed = state.store.get_user(actor.id).await?.is_some();
    let user = state
        .store
        .get_or_create_user(actor.id, actor.username.as_deref(), referrer)
        .await?;
    if !existed {
        info!("New user {} (referrer: {:?})", actor.id, user.referrer_id);
        if let Some(referrer) = user.referrer_id {
            let note = format!(
                "🎉 {} joined with your link. You will earn {:.0}% of their top-ups.",
                escape_html(&actor.display_name()),
                REFERRAL_BONUS_PERCENT
            );
            if let Err(e) = say(state, referrer, note).await {
                info!("Referrer {} not notified: {}", referrer, e);
            }
        }
    }
    let menu = main_menu_message(state, actor).await?;
    show(state, Screen::New(event.chat_id), menu).await
}

pub async fn main_menu(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    state.registry.promo_entry.exit(actor.id);
    let menu = main_menu_message(state, actor).await?;
    show(state, screen, menu).await
}

pub async fn tariffs(state: &AppState, screen: Screen) -> BotResult<()> {
    let products = state.store.list_products().await?;
    let text = format!("💎 <b>Choose a location</b>{}", sale_banner(state));
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::products(&products)),
    )
    .await
}

pub async fn product(state: &AppState, screen: Screen, product_id: i64) -> BotResult<()> {
    let product = state
        .store
        .get_product(product_id)
        .await?
        .ok_or_else(|| BotError::invalid("this location is no longer available"))?;
    let sale = state.flash.active().map(|s| s.percent).unwrap_or(0);
    let text = format!(
        "{}\n\n{}\n\nChoose a period:{}",
        escape_html(&product.title()),
        escape_html(&product.description),
        sale_banner(state)
    );
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::plans(&product, sale)),
    )
    .await
}

pub async fn plan(state: &AppState, screen: Screen, product_id: i64, months: u32) -> BotResult<()> {
    let (product, price) = state.shop.quote(product_id, months).await?;
    let text = format!(
        "🧾 <b>Order</b>\n\n{}\n📅 {} month(s)\n💵 Total: <b>{:.0} ₽</b>",
        escape_html(&product.title()),
        months,
        price
    );
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::checkout(product_id, months)),
    )
    .await
}

pub async fn pay_with_balance(
    state: &AppState,
    screen: Screen,
    actor: &Actor,
    product_id: i64,
    months: u32,
) -> BotResult<()> {
    state
        .store
        .get_or_create_user(actor.id, actor.username.as_deref(), None)
        .await?;
    let message = match state.shop.purchase(actor.id, product_id, months).await? {
        PurchaseOutcome::Purchased {
            product,
            months,
            price,
            subscription,
            balance,
        } => {
            notify_sale(state, actor, &product.title(), months, price).await;
            OutgoingMessage::text(format!(
                "✅ <b>Payment successful!</b>\n\n{}\n📅 Valid until: {}\n💰 Balance: {:.0} ₽\n\n🔑 Your key:\n<code>{}</code>",
                escape_html(&product.title()),
                subscription.expires_at.format("%d.%m.%Y"),
                balance,
                escape_html(&subscription.key_string)
            ))
            .with_keyboard(keyboards::back_main())
        }
        PurchaseOutcome::InsufficientFunds { balance, price } => OutgoingMessage::text(format!(
            "❌ <b>Not enough funds</b>\n\n💵 Price: {:.0} ₽\n💰 Balance: {:.0} ₽\n➖ Missing: <b>{:.0} ₽</b>",
            price,
            balance,
            price - balance
        ))
        .with_keyboard(keyboards::top_up()),
        PurchaseOutcome::Refunded { price } => OutgoingMessage::text(format!(
            "⚠️ The key could not be created right now.\n\n{:.0} ₽ has been returned to your balance. Please try again later.",
            price
        ))
        .with_keyboard(keyboards::back_main()),
    };
    show(state, screen, message).await
}

async fn notify_sale(state: &AppState, actor: &Actor, title: &str, months: u32, price: f64) {
    let text = format!(
        "💰 <b>New sale</b>\n\n👤 {} (<code>{}</code>)\n📦 {} ({} mo)\n💵 {:.0} ₽",
        escape_html(&actor.display_name()),
        actor.id,
        escape_html(title),
        months,
        price
    );
    for &admin in &state.config.telegram.admin_ids {
        if let Err(e) = say(state, admin, text.clone()).await {
            info!("Sale notice to {} failed: {}", admin, e);
        }
    }
}

pub async fn my_subscriptions(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    let subs = state.store.list_subscriptions(actor.id).await?;
    let now = Utc::now();
    let text = if subs.is_empty() {
        "🔑 You have no subscriptions yet.".to_string()
    } else {
        let mut text = "🔑 <b>Your subscriptions</b>\n".to_string();
        for sub in &subs {
            let status = if sub.subscription.expires_at > now {
                "🟢"
            } else {
                "🔴"
            };
            text.push_str(&format!(
                "\n{} {} {}\n📅 until {}\n<code>{}</code>\n",
                status,
                sub.country_flag,
                escape_html(&sub.product_name),
                sub.subscription.expires_at.format("%d.%m.%Y"),
                escape_html(&sub.subscription.key_string)
            ));
        }
        text
    };
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::back_main()),
    )
    .await
}

pub async fn balance(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    let user = state
        .store
        .get_or_create_user(actor.id, actor.username.as_deref(), None)
        .await?;
    let text = format!(
        "💰 <b>Balance:</b> {:.0} ₽\n\nTo top up, write to support and we will credit your account.",
        user.balance
    );
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::top_up()),
    )
    .await
}

pub async fn promo_enter(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    state.registry.promo_entry.enter(actor.id, ());
    show(
        state,
        screen,
        OutgoingMessage::text("🎟 Send your promo code:").with_keyboard(keyboards::back_main()),
    )
    .await
}

pub async fn redeem_promo(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    let actor = &event.sender;
    let text = event.text().unwrap_or_default();
    let outcome = state
        .promos
        .redeem(actor.id, actor.username.as_deref(), text)
        .await?;
    state.registry.promo_entry.exit(actor.id);

    let message = match outcome {
        RedeemOutcome::Credited { code, amount } => OutgoingMessage::text(format!(
            "✅ Promo code <code>{}</code> activated!\n💰 <b>{:.0} ₽</b> added to your balance.",
            escape_html(&code),
            amount
        ))
        .with_keyboard(keyboards::back_main()),
        RedeemOutcome::Rejected(reason) => {
            let text = match reason {
                PromoRejection::NotFound => "❌ Promo code not found.",
                PromoRejection::Inactive => "❌ This promo code is no longer active.",
                PromoRejection::Exhausted => "❌ This promo code has been used up.",
                PromoRejection::AlreadyUsed => "❌ You have already used this promo code.",
            };
            OutgoingMessage::text(text).with_keyboard(keyboards::promo_retry())
        }
    };
    show(state, Screen::New(event.chat_id), message).await
}

pub async fn referral(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    let summary = state.store.referral_summary(actor.id).await?;
    let text = format!(
        "👥 <b>Invite friends</b>\n\nYou get {:.0}% of every top-up your friends make.\n\n🔗 Your link:\n<code>{}</code>\n\n👤 Invited: <b>{}</b>\n💰 Earned: <b>{:.0} ₽</b>",
        REFERRAL_BONUS_PERCENT,
        state.referral_link(actor.id),
        summary.count,
        summary.earnings
    );
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::referral(None, 0)),
    )
    .await
}

fn render_referral_page(page: &ReferralPage) -> String {
    if page.items.is_empty() {
        return "👥 Nobody has joined with your link yet.".to_string();
    }
    let mut text = format!(
        "👥 <b>Your referrals</b> ({} total, page {}/{})\n",
        page.total, page.page, page.total_pages
    );
    let offset = (page.page.saturating_sub(1) * REFERRALS_PER_PAGE) as usize;
    for (i, entry) in page.items.iter().enumerate() {
        let name = entry
            .username
            .as_deref()
            .map(|u| format!("@{}", u))
            .unwrap_or_else(|| entry.telegram_id.to_string());
        text.push_str(&format!(
            "\n{}. {} · {}",
            offset + i + 1,
            escape_html(&name),
            entry.created_at.format("%d.%m.%Y")
        ));
    }
    text
}

pub async fn referral_list(state: &AppState, screen: Screen, actor: &Actor, page: u32) -> BotResult<()> {
    let page = state
        .store
        .referrals_page(actor.id, page.max(1), REFERRALS_PER_PAGE)
        .await?;
    show(
        state,
        screen,
        OutgoingMessage::text(render_referral_page(&page))
            .with_keyboard(keyboards::referral(Some(page.page), page.total_pages)),
    )
    .await
}

pub async fn support_hub(state: &AppState, screen: Screen) -> BotResult<()> {
    show(
        state,
        screen,
        OutgoingMessage::text(
            "🆘 <b>Support</b>\n\nHave a question or a problem? Open a chat with our team and describe it in as much detail as you can.",
        )
        .with_keyboard(keyboards::support_hub()),
    )
    .await
}

pub async fn support_enter(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    state.registry.promo_entry.exit(actor.id);
    state.registry.support_mode.enter(actor.id, ());
    show(
        state,
        screen,
        OutgoingMessage::text(
            "💬 <b>You are in the support chat</b>\n\nWrite your message, photos and files are welcome. Use /stop_support to leave.",
        )
        .with_keyboard(keyboards::support_session()),
    )
    .await
}

pub async fn support_exit(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    state.registry.support_mode.exit(actor.id);
    show(
        state,
        screen,
        OutgoingMessage::text("🚪 You left the support chat.").with_keyboard(keyboards::back_main()),
    )
    .await
}

/// The user marks their own ticket as solved.
pub async fn ticket_solve(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    let name = actor.display_name();
    let was_open = state
        .support
        .close_ticket(&state.registry, actor.id, None, &name)
        .await;
    if was_open {
        let note = format!("✅ {} marked their ticket as solved.", escape_html(&name));
        if let Err(e) = say(state, state.support.staff_chat(), note).await {
            info!("Staff chat not notified about solved ticket: {}", e);
        }
    }
    show(
        state,
        screen,
        OutgoingMessage::text("🙏 Thanks! Glad we could help.").with_keyboard(keyboards::back_main()),
    )
    .await
}

pub async fn forward_to_support(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    let actor = &event.sender;
    let user = state
        .store
        .get_or_create_user(actor.id, actor.username.as_deref(), None)
        .await?;
    state
        .support
        .forward_to_staff(actor, user.balance, &event.content)
        .await?;
    let first = state
        .support
        .tickets()
        .get(actor.id)
        .is_some_and(|t| t.message_count == 1);
    if first {
        say(state, event.chat_id, "📨 Sent! Support will answer here shortly.").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::handlers::{process_callback, process_message};
    use crate::testing::{actor, callback, harness, text_from, SUPPORT_CHAT};
    use frogvpn_db::models::TransactionType;
    use frogvpn_db::Store;

    const USER: i64 = 555;

    #[tokio::test]
    async fn start_records_referrer() {
        let h = harness();
        h.store.get_or_create_user(77, Some("inviter"), None).await.unwrap();

        process_message(&h.state, text_from(actor(USER, "newbie"), "/start 77")).await;

        let user = h.store.get_user(USER).await.unwrap().unwrap();
        assert_eq!(user.referrer_id, Some(77));
        assert!(h.transport.last_body_to(77).unwrap().contains("@newbie"));
        assert!(h.transport.last_body_to(USER).unwrap().contains("FrogVPN"));
    }

    #[tokio::test]
    async fn start_ignores_self_referral() {
        let h = harness();
        process_message(&h.state, text_from(actor(USER, "me"), "/start 555")).await;
        let user = h.store.get_user(USER).await.unwrap().unwrap();
        assert_eq!(user.referrer_id, None);
    }

    #[tokio::test]
    async fn referral_screen_shows_bonus_and_link() {
        let h = harness();
        let me = actor(USER, "u");
        h.store.get_or_create_user(USER, Some("u"), None).await.unwrap();

        process_callback(&h.state, callback(me, "ref_system")).await;

        let text = h
            .transport
            .edits()
            .into_iter()
            .find_map(|edit| match edit {
                crate::testing::Edit::Text { text, .. } => Some(text),
                _ => None,
            })
            .unwrap();
        assert!(text.contains(&format!("{:.0}%", REFERRAL_BONUS_PERCENT)));
        assert!(text.contains(&h.state.referral_link(USER)));
    }

    #[tokio::test]
    async fn promo_entry_flow() {
        let h = harness();
        h.state.promos.create("HELLO", 100.0, 10).await.unwrap();
        let me = actor(USER, "u");

        process_callback(&h.state, callback(me.clone(), "promo_enter")).await;
        assert!(h.state.registry.promo_entry.contains(USER));

        // Too short: slot stays for another try.
        process_message(&h.state, text_from(me.clone(), "hi")).await;
        assert!(h.state.registry.promo_entry.contains(USER));
        assert!(h.transport.last_body_to(USER).unwrap().contains("try again"));

        process_message(&h.state, text_from(me.clone(), "hello")).await;
        assert!(!h.state.registry.promo_entry.contains(USER));
        assert_eq!(h.store.get_user(USER).await.unwrap().unwrap().balance, 100.0);
    }

    #[tokio::test]
    async fn purchase_from_balance() {
        let h = harness();
        let me = actor(USER, "u");
        h.store.get_or_create_user(USER, Some("u"), None).await.unwrap();
        h.store.credit(USER, 500.0, TransactionType::TopUp).await.unwrap();

        process_callback(&h.state, callback(me, "pay_balance:1:1")).await;

        assert_eq!(h.store.subscription_count(), 1);
        let receipt = h.transport.edits();
        assert_eq!(receipt.len(), 1);
        assert!(h
            .transport
            .last_body_to(crate::testing::ADMIN)
            .unwrap()
            .contains("New sale"));
    }

    #[tokio::test]
    async fn support_round_trip() {
        let h = harness();
        let me = actor(USER, "u");
        process_callback(&h.state, callback(me.clone(), "ticket_create")).await;
        assert!(h.state.registry.support_mode.contains(USER));

        process_message(&h.state, text_from(me.clone(), "my vpn is down")).await;
        let post = h.transport.last_body_to(SUPPORT_CHAT).unwrap();
        assert!(post.contains("#user_555"));
        assert!(post.contains("my vpn is down"));
        assert_eq!(h.transport.bodies_to(USER).len(), 1);

        process_message(&h.state, text_from(me.clone(), "still down")).await;
        assert_eq!(h.transport.bodies_to(USER).len(), 1);
        assert_eq!(h.state.support.tickets().get(USER).unwrap().message_count, 2);

        process_callback(&h.state, callback(me.clone(), "ticket_solve")).await;
        assert!(!h.state.registry.support_mode.contains(USER));
        assert!(h.state.support.tickets().get(USER).is_none());
        assert!(h
            .transport
            .last_body_to(SUPPORT_CHAT)
            .unwrap()
            .contains("solved"));
    }

    #[tokio::test]
    async fn stop_support_command_leaves_mode() {
        let h = harness();
        let me = actor(USER, "u");
        h.state.registry.support_mode.enter(USER, ());
        process_message(&h.state, text_from(me, "/stop_support")).await;
        assert!(!h.state.registry.support_mode.contains(USER));
        assert!(h.transport.bodies_to(SUPPORT_CHAT).is_empty());
    }

    #[tokio::test]
    async fn staff_buttons_are_refused_for_users() {
        let h = harness();
        process_callback(&h.state, callback(actor(USER, "u"), "admin_broadcast")).await;
        assert!(h.state.registry.broadcast.peek(USER).is_none());
        assert!(h.transport.sent().is_empty());
        assert!(h.transport.edits().is_empty());
    }
}
