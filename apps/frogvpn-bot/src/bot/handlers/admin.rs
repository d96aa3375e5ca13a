//! Staff panel, wizards and ticket handling.

use tracing::{info, warn};

use super::{say, show, Screen};
use crate::bot::keyboards;
use crate::broadcast::JobKind;
use crate::conversation::{BroadcastDraft, FlashDraft, IssueDraft, IssueStep, PromoDraft};
use crate::error::{BotError, BotResult};
use crate::event::{Actor, CallbackEvent, InboundEvent};
use crate::flash_sale::{self, apply_discount};
use crate::services::admin_service::UserProfile;
use crate::services::promo_service::{parse_activations, parse_amount, parse_new_code};
use crate::services::shop_service::IssuedKey;
use crate::state::AppState;
use crate::support::StaffPost;
use crate::transport::{escape_html, Content, OutgoingMessage};

fn input(event: &InboundEvent) -> &str {
    event.text().map(str::trim).unwrap_or_default()
}

pub async fn panel(state: &AppState, screen: Screen) -> BotResult<()> {
    let stats = state.admin.stats().await?;
    let sale = state
        .flash
        .active()
        .map(|s| {
            format!(
                "\n🔥 <b>Sale:</b> -{}% until {}",
                s.percent,
                s.ends_at.format("%H:%M UTC")
            )
        })
        .unwrap_or_default();
    let text = format!(
        "👮 <b>Control center</b>\n\n📅 <b>Today</b>\n➕ New users: <b>{}</b>\n💰 Revenue: <b>{:.0} ₽</b>\n💎 Active subscriptions: <b>{}</b>\n👥 Total users: <b>{}</b>{}",
        stats.new_users_today,
        stats.revenue_today,
        stats.active_subscriptions,
        stats.total_users,
        sale
    );
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::admin_panel()),
    )
    .await
}

pub async fn stats(state: &AppState, screen: Screen) -> BotResult<()> {
    let stats = state.admin.stats().await?;
    let text = format!(
        "📊 <b>Statistics</b>\n\n👥 Users: <b>{}</b> (+{} today)\n💎 Active subscriptions: <b>{}</b>\n\n💰 Revenue today: <b>{:.0} ₽</b>\n📆 This month: <b>{:.0} ₽</b>\n🏦 All time: <b>{:.0} ₽</b>\n👛 User balances: <b>{:.0} ₽</b>\n\n🎫 Waiting tickets: <b>{}</b>\n📢 Broadcast running: <b>{}</b>",
        stats.total_users,
        stats.new_users_today,
        stats.active_subscriptions,
        stats.revenue_today,
        stats.revenue_month,
        stats.revenue_all_time,
        stats.total_balances,
        state.support.tickets().waiting_count(),
        if state.broadcaster.is_running() { "yes" } else { "no" }
    );
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::back_admin()),
    )
    .await
}

// broadcast

pub async fn broadcast_start(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    if state.broadcaster.is_running() {
        return Err(BotError::AlreadyRunning);
    }
    state.registry.exit_text_flows(actor);
    state.registry.broadcast.enter(actor, BroadcastDraft::AwaitingMessage);
    show(
        state,
        screen,
        OutgoingMessage::text(
            "📢 <b>Broadcast</b>\n\nSend the message to deliver: text, or a photo, document or video with a caption.",
        )
        .with_keyboard(keyboards::broadcast_cancel()),
    )
    .await
}

pub async fn capture_broadcast(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    let actor = event.sender.id;
    let content = match &event.content {
        Content::Voice { .. } => {
            return Err(BotError::invalid(
                "voice notes cannot be broadcast, send text or media",
            ))
        }
        Content::Text(text) if text.trim().is_empty() => {
            return Err(BotError::invalid("the message is empty"))
        }
        other => match other.body() {
            Some(body) => other.with_body(escape_html(body)),
            None => other.clone(),
        },
    };
    let message = OutgoingMessage::new(content);
    state
        .registry
        .broadcast
        .advance(actor, |draft| *draft = BroadcastDraft::AwaitingConfirm(message.clone()))?;

    let recipients = state.store.list_user_ids().await?.len();
    state.transport.send(event.chat_id, message).await?;
    show(
        state,
        Screen::New(event.chat_id),
        OutgoingMessage::text(format!(
            "👆 Preview above.\n\nSend it to <b>{}</b> users?",
            recipients
        ))
        .with_keyboard(keyboards::broadcast_confirm()),
    )
    .await
}

pub async fn broadcast_confirm(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    let Some(BroadcastDraft::AwaitingConfirm(message)) = state.registry.broadcast.exit(actor) else {
        return Err(BotError::NotInFlow);
    };
    match state
        .broadcaster
        .launch_to_all(state.store.as_ref(), JobKind::Broadcast, actor, message.clone())
        .await
    {
        Ok(_job) => {
            info!("Broadcast launched by {}", actor);
            show(
                state,
                screen,
                OutgoingMessage::text("🚀 Broadcast started. You will get progress updates here.")
                    .with_keyboard(keyboards::broadcast_running()),
            )
            .await
        }
        Err(BotError::AlreadyRunning) => {
            state
                .registry
                .broadcast
                .enter(actor, BroadcastDraft::AwaitingConfirm(message));
            Err(BotError::AlreadyRunning)
        }
        Err(e) => Err(e),
    }
}

pub async fn broadcast_cancel(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.broadcast.exit(actor);
    panel(state, screen).await
}

pub async fn broadcast_stop(state: &AppState, chat_id: i64) -> BotResult<()> {
    if state.broadcaster.cancel_active() {
        say(state, chat_id, "⏹ Stopping the broadcast, a summary will follow.").await
    } else {
        say(state, chat_id, "ℹ️ No broadcast is running.").await
    }
}

// key issuance

pub async fn issue_start(
    state: &AppState,
    screen: Screen,
    actor: i64,
    preset_target: Option<i64>,
) -> BotResult<()> {
    state.registry.exit_text_flows(actor);
    state
        .registry
        .key_issuance
        .enter(actor, IssueDraft::new(preset_target));
    let products = state.store.list_products().await?;
    let target = preset_target
        .map(|id| format!("\n🎁 Gift for <code>{}</code>", id))
        .unwrap_or_default();
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "🔑 <b>Issue a key</b>{}\n\n<b>Step 1/3:</b> choose a location",
            target
        ))
        .with_keyboard(keyboards::issue_products(&products)),
    )
    .await
}

pub async fn issue_product(state: &AppState, screen: Screen, actor: i64, product_id: i64) -> BotResult<()> {
    let product = state
        .store
        .get_product(product_id)
        .await?
        .ok_or_else(|| BotError::invalid("unknown location"))?;
    let moved = state.registry.key_issuance.advance(actor, |draft| {
        draft.step = IssueStep::Days { product_id };
    });
    if matches!(moved, Err(BotError::NotInFlow)) {
        return issue_start(state, screen, actor, None).await;
    }
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "🔑 <b>Issue a key</b>\n\n{}\n\n<b>Step 2/3:</b> choose the duration",
            escape_html(&product.title())
        ))
        .with_keyboard(keyboards::issue_days()),
    )
    .await
}

pub async fn issue_days(
    state: &AppState,
    screen: Screen,
    actor: &Actor,
    days: u32,
) -> BotResult<()> {
    if !keyboards::ISSUE_DAYS.contains(&days) {
        return Err(BotError::invalid("unsupported duration"));
    }
    let draft = state
        .registry
        .key_issuance
        .peek(actor.id)
        .ok_or(BotError::NotInFlow)?;
    let IssueStep::Days { product_id } = draft.step else {
        return Err(BotError::NotInFlow);
    };

    if let Some(target) = draft.preset_target {
        state.registry.key_issuance.exit(actor.id);
        let issued = state.shop.gift(target, product_id, days).await?;
        return deliver_key(state, screen, target, days, issued).await;
    }

    state.registry.key_issuance.advance(actor.id, |draft| {
        draft.step = IssueStep::TargetUser { product_id, days };
    })?;
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "🔑 <b>Issue a key</b>\n\n📅 {} days\n\n<b>Step 3/3:</b> send the recipient's Telegram ID, or create a key without a user.",
            days
        ))
        .with_keyboard(keyboards::issue_target()),
    )
    .await
}

fn issue_target(state: &AppState, actor: i64) -> BotResult<(i64, u32)> {
    match state.registry.key_issuance.peek(actor).map(|d| d.step) {
        Some(IssueStep::TargetUser { product_id, days }) => Ok((product_id, days)),
        _ => Err(BotError::NotInFlow),
    }
}

pub async fn issue_user_id(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    let actor = event.sender.id;
    let (product_id, days) = issue_target(state, actor)?;
    let target: i64 = input(event)
        .parse()
        .map_err(|_| BotError::invalid("the Telegram ID must be a number"))?;
    let issued = state.shop.gift(target, product_id, days).await?;
    state.registry.key_issuance.exit(actor);
    deliver_key(state, Screen::New(event.chat_id), target, days, issued).await
}

async fn deliver_key(
    state: &AppState,
    screen: Screen,
    target: i64,
    days: u32,
    issued: IssuedKey,
) -> BotResult<()> {
    let IssuedKey {
        product,
        subscription,
    } = issued;
    let key = escape_html(&subscription.key_string);
    let user_text = format!(
        "🎁 <b>You received a VPN key!</b>\n\n{}\n📅 Valid until: {}\n\n🔑 Your key:\n<code>{}</code>",
        escape_html(&product.title()),
        subscription.expires_at.format("%d.%m.%Y"),
        key
    );
    let delivered = match say(state, target, user_text).await {
        Ok(()) => String::new(),
        Err(e) => {
            warn!("Issued key could not be sent to {}: {}", target, e);
            "\n\n⚠️ Could not message the user, pass the key on manually.".to_string()
        }
    };
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "✅ <b>Key issued</b>\n\n{}\n📅 {} days\n👤 <code>{}</code>\n\n🔑 <code>{}</code>{}",
            escape_html(&product.title()),
            days,
            target,
            key,
            delivered
        ))
        .with_keyboard(keyboards::issue_done()),
    )
    .await
}

/// Creates a key attached to the issuing admin, to be handed out manually.
pub async fn issue_without_user(state: &AppState, screen: Screen, actor: &Actor) -> BotResult<()> {
    let (product_id, days) = issue_target(state, actor.id)?;
    state
        .store
        .get_or_create_user(actor.id, actor.username.as_deref(), None)
        .await?;
    let issued = state.shop.gift(actor.id, product_id, days).await?;
    state.registry.key_issuance.exit(actor.id);
    let text = format!(
        "✅ <b>Key created</b>\n\n{}\n📅 Valid until: {}\n\n🔑 <code>{}</code>\n\nThis key is not tied to a user, pass it on manually.",
        escape_html(&issued.product.title()),
        issued.subscription.expires_at.format("%d.%m.%Y"),
        escape_html(&issued.subscription.key_string)
    );
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::issue_done()),
    )
    .await
}

pub async fn issue_cancel(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.key_issuance.exit(actor);
    panel(state, screen).await
}

// users

pub async fn find_start(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.exit_text_flows(actor);
    state.registry.user_search.enter(actor, ());
    show(
        state,
        screen,
        OutgoingMessage::text("🔍 Send a Telegram ID or @username:")
            .with_keyboard(keyboards::back_admin()),
    )
    .await
}

fn render_profile(profile: &UserProfile) -> String {
    let user = &profile.user;
    let mut text = format!(
        "👤 <b>{}</b>\n🆔 <code>{}</code>\n💰 Balance: <b>{:.0} ₽</b>\n👥 Referral earnings: {:.0} ₽\n📅 Joined: {}\n",
        escape_html(&user.display_name()),
        user.telegram_id,
        user.balance,
        user.total_ref_earnings,
        user.created_at.format("%d.%m.%Y")
    );
    if let Some(referrer) = user.referrer_id {
        text.push_str(&format!("🔗 Invited by <code>{}</code>\n", referrer));
    }
    if profile.subscriptions.is_empty() {
        text.push_str("\n🔑 No subscriptions");
    } else {
        text.push_str(&format!("\n🔑 Subscriptions ({}):", profile.subscriptions.len()));
        for sub in &profile.subscriptions {
            text.push_str(&format!(
                "\n{} {} until {}",
                sub.country_flag,
                escape_html(&sub.product_name),
                sub.subscription.expires_at.format("%d.%m.%Y")
            ));
        }
    }
    text
}

/// Shows the user card for `query`, or fails with invalid input if nobody matches.
pub async fn find_user(state: &AppState, chat_id: i64, query: &str) -> BotResult<()> {
    let profile = state
        .admin
        .find(query)
        .await?
        .ok_or_else(|| BotError::invalid(format!("no user matches {}", query.trim())))?;
    show(
        state,
        Screen::New(chat_id),
        OutgoingMessage::text(render_profile(&profile))
            .with_keyboard(keyboards::user_card(profile.user.telegram_id)),
    )
    .await
}

pub async fn search_input(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    find_user(state, event.chat_id, input(event)).await?;
    state.registry.user_search.exit(event.sender.id);
    Ok(())
}

pub async fn add_balance_start(state: &AppState, screen: Screen, actor: i64, target: i64) -> BotResult<()> {
    state.registry.exit_text_flows(actor);
    state.registry.balance_top_up.enter(actor, target);
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "💰 Top up <code>{}</code>\n\nPick an amount or send your own:",
            target
        ))
        .with_keyboard(keyboards::add_balance(target)),
    )
    .await
}

pub async fn balance_amount(state: &AppState, event: &InboundEvent, target: i64) -> BotResult<()> {
    let amount = parse_amount(input(event))?;
    apply_top_up(state, Screen::New(event.chat_id), event.sender.id, target, amount).await
}

pub async fn apply_top_up(
    state: &AppState,
    screen: Screen,
    actor: i64,
    target: i64,
    amount: f64,
) -> BotResult<()> {
    let top_up = state.admin.add_balance(target, amount).await?;
    state.registry.balance_top_up.exit(actor);

    if let Err(e) = say(
        state,
        target,
        format!(
            "💰 Your balance was topped up by <b>{:.0} ₽</b>.\nBalance: <b>{:.0} ₽</b>",
            amount, top_up.balance
        ),
    )
    .await
    {
        info!("Top-up notice to {} failed: {}", target, e);
    }
    let mut text = format!(
        "✅ Credited <b>{:.0} ₽</b> to <code>{}</code>.\nNew balance: <b>{:.0} ₽</b>",
        amount, target, top_up.balance
    );
    if let Some(payout) = top_up.payout {
        text.push_str(&format!(
            "\n👥 Referral bonus {:.0} ₽ paid to <code>{}</code>",
            payout.bonus, payout.referrer_telegram_id
        ));
        if let Err(e) = say(
            state,
            payout.referrer_telegram_id,
            format!("🎉 You earned <b>{:.0} ₽</b> from a friend's top-up!", payout.bonus),
        )
        .await
        {
            info!("Bonus notice to {} failed: {}", payout.referrer_telegram_id, e);
        }
    }
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::user_card(target)),
    )
    .await
}

// support

pub async fn reply_start(state: &AppState, screen: Screen, actor: i64, target: i64) -> BotResult<()> {
    state.registry.exit_text_flows(actor);
    state.registry.support_reply.enter(actor, target);
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "✍️ Send your reply to <code>{}</code>:",
            target
        ))
        .with_keyboard(keyboards::reply_cancel()),
    )
    .await
}

pub async fn reply_to_ticket(state: &AppState, event: &InboundEvent, target: i64) -> BotResult<()> {
    state.support.deliver_reply(target, &event.content).await?;
    state.registry.support_reply.exit(event.sender.id);
    say(state, event.chat_id, format!("✅ Reply sent to <code>{}</code>.", target)).await
}

pub async fn reply_cancel(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.support_reply.exit(actor);
    show(state, screen, OutgoingMessage::text("❌ Reply cancelled.")).await
}

/// A reply in the staff chat: routed back to the ticket owner by tag.
pub async fn staff_chat_reply(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    let Some(quoted) = &event.reply_to else {
        return Ok(());
    };
    state
        .support
        .route_staff_reply(quoted, &event.content)
        .await?;
    Ok(())
}

pub async fn close_ticket(state: &AppState, event: &CallbackEvent, target: i64) -> BotResult<()> {
    let post = StaffPost {
        message_id: event.message_id,
        body: event.message_body.clone(),
        is_media: event.message_is_media,
    };
    let closed = state
        .support
        .close_ticket(&state.registry, target, Some(post), &event.sender.display_name())
        .await;
    if closed {
        if let Err(e) = say(
            state,
            target,
            "✅ Your support ticket was closed. Write again any time from the Support menu.",
        )
        .await
        {
            info!("Close notice to {} failed: {}", target, e);
        }
    }
    Ok(())
}

// promo codes

pub async fn promo_menu(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.promo_create.exit(actor);
    state.registry.promo_delete.exit(actor);
    show(
        state,
        screen,
        OutgoingMessage::text("🎟 <b>Promo codes</b>").with_keyboard(keyboards::promo_menu()),
    )
    .await
}

pub async fn promo_create_start(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.exit_text_flows(actor);
    state.registry.promo_create.enter(actor, PromoDraft::Code);
    show(
        state,
        screen,
        OutgoingMessage::text(
            "➕ <b>New promo code</b>\n\n<b>Step 1/3:</b> send the code (3 to 20 characters), e.g. SALE50",
        )
        .with_keyboard(keyboards::promo_cancel()),
    )
    .await
}

pub async fn promo_wizard_step(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    let actor = event.sender.id;
    let text = input(event);
    let draft = state
        .registry
        .promo_create
        .peek(actor)
        .ok_or(BotError::NotInFlow)?;

    let prompt = match draft {
        PromoDraft::Code => {
            let code = parse_new_code(text)?;
            if state.promos.is_taken(&code).await? {
                return Err(BotError::invalid(format!("promo {} already exists", code)));
            }
            let prompt = format!(
                "➕ Code: <code>{}</code>\n\n<b>Step 2/3:</b> send the bonus amount in ₽",
                escape_html(&code)
            );
            state
                .registry
                .promo_create
                .advance(actor, |d| *d = PromoDraft::Amount { code })?;
            prompt
        }
        PromoDraft::Amount { code } => {
            let amount = parse_amount(text)?;
            let prompt = format!(
                "➕ Code: <code>{}</code>\n💰 Amount: <b>{:.0} ₽</b>\n\n<b>Step 3/3:</b> send the number of activations",
                escape_html(&code),
                amount
            );
            state
                .registry
                .promo_create
                .advance(actor, |d| *d = PromoDraft::Activations { code, amount })?;
            prompt
        }
        PromoDraft::Activations { code, amount } => {
            let activations = parse_activations(text)?;
            let promo = match state.promos.create(&code, amount, activations).await {
                Ok(promo) => promo,
                Err(e @ BotError::UserInputInvalid(_)) => {
                    // Taken since step one: ask for another code.
                    state
                        .registry
                        .promo_create
                        .advance(actor, |d| *d = PromoDraft::Code)?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            state.registry.promo_create.exit(actor);
            return show(
                state,
                Screen::New(event.chat_id),
                OutgoingMessage::text(format!(
                    "✅ <b>Promo code created</b>\n\n📝 <code>{}</code>\n💰 {:.0} ₽\n🔢 {} activations",
                    escape_html(&promo.code),
                    promo.amount,
                    promo.max_activations
                ))
                .with_keyboard(keyboards::back_promo()),
            )
            .await;
        }
    };
    show(
        state,
        Screen::New(event.chat_id),
        OutgoingMessage::text(prompt).with_keyboard(keyboards::promo_cancel()),
    )
    .await
}

pub async fn promo_list(state: &AppState, screen: Screen) -> BotResult<()> {
    let promos = state.promos.list().await?;
    let text = if promos.is_empty() {
        "🎟 No promo codes yet.".to_string()
    } else {
        let mut text = "🎟 <b>Promo codes</b>\n".to_string();
        for promo in &promos {
            let status = if !promo.is_active {
                "⚫️"
            } else if promo.is_exhausted() {
                "🔴"
            } else {
                "🟢"
            };
            text.push_str(&format!(
                "\n{} <code>{}</code> · {:.0} ₽ · {}/{} ({:.0}%)",
                status,
                escape_html(&promo.code),
                promo.amount,
                promo.activations_used,
                promo.max_activations,
                promo.usage_pct()
            ));
        }
        text
    };
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::back_promo()),
    )
    .await
}

pub async fn promo_delete_start(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.exit_text_flows(actor);
    state.registry.promo_delete.enter(actor, ());
    show(
        state,
        screen,
        OutgoingMessage::text("🗑 Send the code to deactivate:")
            .with_keyboard(keyboards::promo_cancel()),
    )
    .await
}

pub async fn promo_delete_input(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    let code = input(event);
    if !state.promos.deactivate(code).await? {
        return Err(BotError::invalid(format!("no active promo code {}", code)));
    }
    state.registry.promo_delete.exit(event.sender.id);
    show(
        state,
        Screen::New(event.chat_id),
        OutgoingMessage::text(format!(
            "✅ Promo code <code>{}</code> deactivated.",
            escape_html(&code.to_uppercase())
        ))
        .with_keyboard(keyboards::back_promo()),
    )
    .await
}

pub async fn promo_stats(state: &AppState, screen: Screen) -> BotResult<()> {
    let stats = state.promos.stats().await?;
    let text = if stats.is_empty() {
        "📈 No promo codes yet.".to_string()
    } else {
        let mut text = "📈 <b>Promo statistics</b>\n".to_string();
        for s in &stats {
            text.push_str(&format!(
                "\n<code>{}</code>: {}/{} used, {:.0} ₽ paid",
                escape_html(&s.code),
                s.activations_used,
                s.max_activations,
                s.total_bonus_paid
            ));
        }
        text
    };
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::back_promo()),
    )
    .await
}

pub async fn top_referrers(state: &AppState, screen: Screen) -> BotResult<()> {
    let top = state.admin.top_referrers().await?;
    let text = if top.is_empty() {
        "🏆 No referrals yet.".to_string()
    } else {
        let mut text = "🏆 <b>Top referrers</b>\n".to_string();
        for (i, r) in top.iter().enumerate() {
            let name = r
                .username
                .as_deref()
                .map(|u| format!("@{}", u))
                .unwrap_or_else(|| r.telegram_id.to_string());
            text.push_str(&format!(
                "\n{}. {} · {} invited · {:.0} ₽",
                i + 1,
                escape_html(&name),
                r.referral_count,
                r.total_revenue
            ));
        }
        text
    };
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::back_admin()),
    )
    .await
}

// flash sale

pub async fn flash_menu(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.flash_sale.exit(actor);
    let active = state.flash.active();
    let status = match active {
        Some(sale) => format!(
            "🔥 Running: <b>-{}%</b> until {}",
            sale.percent,
            sale.ends_at.format("%d.%m %H:%M UTC")
        ),
        None => "No sale is running.".to_string(),
    };
    show(
        state,
        screen,
        OutgoingMessage::text(format!("🔥 <b>Flash sale</b>\n\n{}", status))
            .with_keyboard(keyboards::flash_menu(active.is_some())),
    )
    .await
}

pub async fn flash_manual(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    state.registry.flash_sale.enter(actor, FlashDraft::default());
    show(
        state,
        screen,
        OutgoingMessage::text("🔥 <b>Step 1/2:</b> choose the discount")
            .with_keyboard(keyboards::flash_percent()),
    )
    .await
}

pub async fn flash_percent(state: &AppState, screen: Screen, actor: i64, percent: u32) -> BotResult<()> {
    flash_sale::validate(percent, 1)?;
    state
        .registry
        .flash_sale
        .advance(actor, |d| d.percent = Some(percent))?;
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "🔥 Discount: <b>-{}%</b>\n\n<b>Step 2/2:</b> choose the duration",
            percent
        ))
        .with_keyboard(keyboards::flash_hours()),
    )
    .await
}

pub async fn flash_hours(state: &AppState, screen: Screen, actor: i64, hours: u32) -> BotResult<()> {
    let draft = state.registry.flash_sale.advance(actor, |d| {
        d.hours = Some(hours);
        *d
    })?;
    let percent = draft.percent.ok_or(BotError::NotInFlow)?;
    flash_sale::validate(percent, hours)?;
    let base = state.config.flash_sale.base_price;
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "🔥 <b>Confirm the sale</b>\n\n📉 -{}% for {} h\n💰 1 month: {:.0} ₽ → {:.0} ₽\n\nEvery user will be notified.",
            percent,
            hours,
            base,
            apply_discount(base, percent)
        ))
        .with_keyboard(keyboards::flash_confirm()),
    )
    .await
}

pub async fn flash_confirm(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    let Some(FlashDraft {
        percent: Some(percent),
        hours: Some(hours),
    }) = state.registry.flash_sale.exit(actor)
    else {
        return Err(BotError::NotInFlow);
    };
    launch_flash_sale(state, screen, actor, percent, hours).await
}

pub async fn launch_flash_sale(
    state: &AppState,
    screen: Screen,
    actor: i64,
    percent: u32,
    hours: u32,
) -> BotResult<()> {
    let settings = state.config.flash_sale_settings();
    let (sale, _job) = flash_sale::launch(
        &state.broadcaster,
        state.store.as_ref(),
        &state.flash,
        &settings,
        actor,
        percent,
        hours,
    )
    .await?;
    show(
        state,
        screen,
        OutgoingMessage::text(format!(
            "🚀 <b>Sale -{}% launched</b>\n⏳ Ends {}\n\nAnnouncing to every user, a summary will follow.",
            sale.percent,
            sale.ends_at.format("%d.%m %H:%M UTC")
        ))
        .with_keyboard(keyboards::back_admin()),
    )
    .await
}

pub async fn flash_cancel(state: &AppState, screen: Screen, actor: i64) -> BotResult<()> {
    flash_menu(state, screen, actor).await
}

pub async fn flash_stop(state: &AppState, screen: Screen) -> BotResult<()> {
    let text = match state.flash.clear() {
        Some(sale) => {
            info!("Flash sale -{}% stopped early", sale.percent);
            format!("⏹ Sale -{}% stopped. Prices are back to normal.", sale.percent)
        }
        None => "ℹ️ No sale is running.".to_string(),
    };
    show(
        state,
        screen,
        OutgoingMessage::text(text).with_keyboard(keyboards::back_admin()),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::handlers::{process_callback, process_message};
    use crate::event::QuotedMessage;
    use crate::testing::{
        actor, callback, harness, harness_with, staff_reply, test_config, text_from, ADMIN,
        SUPPORT_CHAT,
    };
    use frogvpn_db::Store;

    fn boss() -> Actor {
        actor(ADMIN, "boss")
    }

    async fn finish_jobs(state: &AppState) {
        while state.broadcaster.is_running() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn invalid_recipient_keeps_step_three() {
        let mut config = test_config();
        config.telegram.admin_ids.push(555);
        let h = harness_with(config);
        let admin = actor(555, "staff555");

        process_message(&h.state, text_from(admin.clone(), "/issue")).await;
        process_callback(&h.state, callback(admin.clone(), "issue_product:1")).await;
        process_callback(&h.state, callback(admin.clone(), "issue_days:30")).await;
        assert_eq!(h.state.registry.key_issuance.peek(555).unwrap().ordinal(), 3);

        process_message(&h.state, text_from(admin.clone(), "not-a-number")).await;

        let draft = h.state.registry.key_issuance.peek(555).unwrap();
        assert_eq!(draft.ordinal(), 3);
        assert_eq!(
            draft.step,
            IssueStep::TargetUser {
                product_id: 1,
                days: 30
            }
        );
        assert_eq!(h.store.subscription_count(), 0);
        assert!(h.transport.last_body_to(555).unwrap().contains("try again"));
    }

    #[tokio::test]
    async fn key_reaches_recipient() {
        let h = harness();
        h.store.get_or_create_user(42, Some("lucky"), None).await.unwrap();

        process_callback(&h.state, callback(boss(), "admin_issue")).await;
        process_callback(&h.state, callback(boss(), "issue_product:2")).await;
        process_callback(&h.state, callback(boss(), "issue_days:90")).await;
        process_message(&h.state, text_from(boss(), "42")).await;

        assert!(h.state.registry.key_issuance.peek(ADMIN).is_none());
        assert_eq!(h.store.subscription_count(), 1);
        assert!(h.transport.last_body_to(42).unwrap().contains("vless://"));
        assert!(h.provider.created()[0].0.starts_with("gift_tg_42_"));
    }

    #[tokio::test]
    async fn unknown_recipient_is_re_prompted() {
        let h = harness();
        process_callback(&h.state, callback(boss(), "admin_issue")).await;
        process_callback(&h.state, callback(boss(), "issue_product:1")).await;
        process_callback(&h.state, callback(boss(), "issue_days:30")).await;
        process_message(&h.state, text_from(boss(), "99999")).await;
        assert_eq!(h.state.registry.key_issuance.peek(ADMIN).unwrap().ordinal(), 3);
        assert!(h.provider.created().is_empty());
    }

    #[tokio::test]
    async fn gift_preset_skips_the_id_step() {
        let h = harness();
        h.store.get_or_create_user(42, Some("lucky"), None).await.unwrap();
        process_callback(&h.state, callback(boss(), "admin_gift:42")).await;
        process_callback(&h.state, callback(boss(), "issue_product:1")).await;
        process_callback(&h.state, callback(boss(), "issue_days:30")).await;
        assert!(h.state.registry.key_issuance.peek(ADMIN).is_none());
        assert_eq!(h.store.subscription_count(), 1);
    }

    #[tokio::test]
    async fn key_without_user() {
        let h = harness();
        process_callback(&h.state, callback(boss(), "admin_issue")).await;
        process_callback(&h.state, callback(boss(), "issue_product:3")).await;
        process_callback(&h.state, callback(boss(), "issue_days:365")).await;
        process_callback(&h.state, callback(boss(), "issue_no_user")).await;
        assert_eq!(h.store.subscription_count(), 1);
        assert!(h.provider.created()[0].0.starts_with("gift_tg_1000_"));
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_wizard_end_to_end() {
        let h = harness();
        for id in [10, 11, 12] {
            h.store.get_or_create_user(id, None, None).await.unwrap();
        }
        process_message(&h.state, text_from(boss(), "/broadcast")).await;
        process_message(&h.state, text_from(boss(), "Maintenance <tonight>")).await;
        assert!(matches!(
            h.state.registry.broadcast.peek(ADMIN),
            Some(BroadcastDraft::AwaitingConfirm(_))
        ));
        assert!(h.transport.last_body_to(ADMIN).unwrap().contains("<b>3</b> users"));

        process_callback(&h.state, callback(boss(), "admin_confirm_broadcast")).await;
        assert!(h.state.registry.broadcast.peek(ADMIN).is_none());
        finish_jobs(&h.state).await;
        assert_eq!(
            h.transport.last_body_to(11).unwrap(),
            "Maintenance &lt;tonight&gt;"
        );
    }

    #[tokio::test]
    async fn second_broadcast_is_refused() {
        let h = harness();
        let reservation = h.state.broadcaster.reserve().unwrap();
        process_message(&h.state, text_from(boss(), "/broadcast")).await;
        assert!(h.state.registry.broadcast.peek(ADMIN).is_none());
        assert!(h
            .transport
            .last_body_to(ADMIN)
            .unwrap()
            .contains("already running"));
        drop(reservation);
    }

    #[tokio::test]
    async fn confirm_while_busy_keeps_the_draft() {
        let h = harness();
        h.state.registry.broadcast.enter(
            ADMIN,
            BroadcastDraft::AwaitingConfirm(OutgoingMessage::text("hi")),
        );
        let reservation = h.state.broadcaster.reserve().unwrap();
        process_callback(&h.state, callback(boss(), "admin_confirm_broadcast")).await;
        assert!(matches!(
            h.state.registry.broadcast.peek(ADMIN),
            Some(BroadcastDraft::AwaitingConfirm(_))
        ));
        drop(reservation);
    }

    #[tokio::test]
    async fn promo_wizard_validates_each_step() {
        let h = harness();
        process_callback(&h.state, callback(boss(), "promo_create")).await;

        process_message(&h.state, text_from(boss(), "ab")).await;
        assert_eq!(h.state.registry.promo_create.peek(ADMIN), Some(PromoDraft::Code));

        process_message(&h.state, text_from(boss(), "spring")).await;
        process_message(&h.state, text_from(boss(), "zero")).await;
        assert_eq!(
            h.state.registry.promo_create.peek(ADMIN),
            Some(PromoDraft::Amount {
                code: "SPRING".into()
            })
        );

        process_message(&h.state, text_from(boss(), "150")).await;
        process_message(&h.state, text_from(boss(), "25")).await;
        assert!(h.state.registry.promo_create.peek(ADMIN).is_none());

        let promo = h.store.get_promo("SPRING").await.unwrap().unwrap();
        assert_eq!(promo.amount, 150.0);
        assert_eq!(promo.max_activations, 25);
    }

    #[tokio::test]
    async fn promo_draft_survives_a_store_outage() {
        let h = harness();
        process_callback(&h.state, callback(boss(), "promo_create")).await;
        process_message(&h.state, text_from(boss(), "autumn")).await;
        process_message(&h.state, text_from(boss(), "200")).await;

        h.store.set_unavailable(true);
        process_message(&h.state, text_from(boss(), "10")).await;
        assert_eq!(
            h.state.registry.promo_create.peek(ADMIN),
            Some(PromoDraft::Activations {
                code: "AUTUMN".into(),
                amount: 200.0
            })
        );
        assert!(h
            .transport
            .bodies_to(ADMIN)
            .last()
            .unwrap()
            .contains("temporarily unavailable"));

        h.store.set_unavailable(false);
        process_message(&h.state, text_from(boss(), "10")).await;
        assert!(h.state.registry.promo_create.peek(ADMIN).is_none());
        let promo = h.store.get_promo("AUTUMN").await.unwrap().unwrap();
        assert_eq!(promo.max_activations, 10);
    }

    #[tokio::test]
    async fn promo_taken_meanwhile_asks_for_a_new_code() {
        let h = harness();
        process_callback(&h.state, callback(boss(), "promo_create")).await;
        process_message(&h.state, text_from(boss(), "winter")).await;
        process_message(&h.state, text_from(boss(), "50")).await;

        h.state.promos.create("WINTER", 10.0, 1).await.unwrap();
        process_message(&h.state, text_from(boss(), "5")).await;
        assert_eq!(h.state.registry.promo_create.peek(ADMIN), Some(PromoDraft::Code));
        assert!(h
            .transport
            .bodies_to(ADMIN)
            .last()
            .unwrap()
            .contains("already exists"));
    }

    #[tokio::test]
    async fn promo_delete_flow() {
        let h = harness();
        h.state.promos.create("OLD", 10.0, 1).await.unwrap();
        process_callback(&h.state, callback(boss(), "promo_delete")).await;
        process_message(&h.state, text_from(boss(), "missing")).await;
        assert!(h.state.registry.promo_delete.contains(ADMIN));
        process_message(&h.state, text_from(boss(), "old")).await;
        assert!(!h.state.registry.promo_delete.contains(ADMIN));
        assert!(!h.store.get_promo("OLD").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn top_up_via_search_card() {
        let h = harness();
        h.store.get_or_create_user(42, Some("lucky"), None).await.unwrap();

        process_callback(&h.state, callback(boss(), "admin_find_user")).await;
        process_message(&h.state, text_from(boss(), "@nobody")).await;
        assert!(h.state.registry.user_search.contains(ADMIN));

        process_message(&h.state, text_from(boss(), "@lucky")).await;
        assert!(!h.state.registry.user_search.contains(ADMIN));
        assert!(h.transport.last_body_to(ADMIN).unwrap().contains("<code>42</code>"));

        process_callback(&h.state, callback(boss(), "admin_addbal:42")).await;
        process_message(&h.state, text_from(boss(), "-5")).await;
        assert_eq!(h.state.registry.balance_top_up.peek(ADMIN), Some(42));

        process_message(&h.state, text_from(boss(), "250")).await;
        assert!(h.state.registry.balance_top_up.peek(ADMIN).is_none());
        assert_eq!(h.store.get_user(42).await.unwrap().unwrap().balance, 250.0);
        assert!(h.transport.last_body_to(42).unwrap().contains("250"));
    }

    #[tokio::test]
    async fn quick_amount_button() {
        let h = harness();
        h.store.get_or_create_user(42, None, None).await.unwrap();
        process_callback(&h.state, callback(boss(), "admin_addbal_amt:42:450")).await;
        assert_eq!(h.store.get_user(42).await.unwrap().unwrap().balance, 450.0);
    }

    #[tokio::test]
    async fn addbal_command() {
        let h = harness();
        h.store.get_or_create_user(42, None, None).await.unwrap();
        process_message(&h.state, text_from(boss(), "/addbal 42 100")).await;
        assert_eq!(h.store.get_user(42).await.unwrap().unwrap().balance, 100.0);
        process_message(&h.state, text_from(boss(), "/addbal 42")).await;
        assert!(h.transport.last_body_to(ADMIN).unwrap().contains("/addbal <id> <amount>"));
    }

    #[tokio::test]
    async fn staff_replies_from_group_and_private_chat() {
        let h = harness();
        let user = actor(555, "client");
        h.state.registry.support_mode.enter(555, ());
        process_message(&h.state, text_from(user.clone(), "help")).await;

        let post = h.transport.last_body_to(SUPPORT_CHAT).unwrap();
        let quoted = QuotedMessage {
            message_id: 1,
            text: Some(post),
            ..Default::default()
        };
        process_message(&h.state, staff_reply(ADMIN, quoted, "on it")).await;
        assert!(h.transport.last_body_to(555).unwrap().contains("on it"));

        process_callback(&h.state, callback(boss(), "admin_reply:555")).await;
        process_message(&h.state, text_from(boss(), "fixed now")).await;
        assert!(h.transport.last_body_to(555).unwrap().contains("fixed now"));
        assert!(h.state.registry.support_reply.peek(ADMIN).is_none());
    }

    #[tokio::test]
    async fn untagged_group_reply_is_silent() {
        let h = harness();
        let quoted = QuotedMessage {
            message_id: 3,
            text: Some("unrelated".into()),
            ..Default::default()
        };
        process_message(&h.state, staff_reply(ADMIN, quoted, "hm")).await;
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn staff_closes_ticket_from_group() {
        let h = harness();
        let user = actor(555, "client");
        h.state.registry.support_mode.enter(555, ());
        process_message(&h.state, text_from(user, "help")).await;

        let mut press = callback(boss(), "admin_close_ticket:555");
        press.chat_id = SUPPORT_CHAT;
        process_callback(&h.state, press.clone()).await;
        assert!(!h.state.registry.support_mode.contains(555));
        assert!(h.transport.last_body_to(555).unwrap().contains("closed"));

        let notices = h.transport.bodies_to(555).len();
        process_callback(&h.state, press).await;
        assert_eq!(h.transport.bodies_to(555).len(), notices);
    }

    #[tokio::test(start_paused = true)]
    async fn flash_sale_wizard_and_stop() {
        let h = harness();
        h.store.get_or_create_user(10, None, None).await.unwrap();

        process_callback(&h.state, callback(boss(), "flash_manual")).await;
        process_callback(&h.state, callback(boss(), "flash_percent:30")).await;
        process_callback(&h.state, callback(boss(), "flash_hours:12")).await;
        process_callback(&h.state, callback(boss(), "flash_confirm")).await;

        assert_eq!(h.state.flash.active().map(|s| s.percent), Some(30));
        finish_jobs(&h.state).await;
        assert!(h.transport.last_body_to(10).unwrap().contains("-30%"));

        process_message(&h.state, text_from(boss(), "/stopsale")).await;
        assert!(h.state.flash.active().is_none());
    }

    #[tokio::test]
    async fn flashsale_command_validates() {
        let h = harness();
        process_message(&h.state, text_from(boss(), "/flashsale 95 6")).await;
        assert!(h.state.flash.active().is_none());
        process_message(&h.state, text_from(boss(), "/flashsale 50 6")).await;
        assert_eq!(h.state.flash.active().map(|s| s.percent), Some(50));
    }

    #[tokio::test]
    async fn admin_commands_ignore_users() {
        let h = harness();
        process_message(&h.state, text_from(actor(555, "u"), "/admin")).await;
        process_message(&h.state, text_from(actor(555, "u"), "/flashsale 50 6")).await;
        assert!(h.transport.sent().is_empty());
        assert!(h.state.flash.active().is_none());
    }

    #[tokio::test]
    async fn cancel_clears_staff_flows() {
        let h = harness();
        h.state.registry.user_search.enter(ADMIN, ());
        h.state.registry.flash_sale.enter(ADMIN, FlashDraft::default());
        process_message(&h.state, text_from(boss(), "/cancel")).await;
        assert!(!h.state.registry.user_search.contains(ADMIN));
        assert!(!h.state.registry.flash_sale.contains(ADMIN));
    }
}
