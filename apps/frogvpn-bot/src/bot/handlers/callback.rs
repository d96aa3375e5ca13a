use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{debug, info};

use super::{admin, process_callback, user, Screen};
use crate::bot::telegram;
use crate::error::BotResult;
use crate::event::CallbackEvent;
use crate::state::AppState;
use crate::triggers::CallbackData;

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    info!("Received callback: {:?}", q.data);
    // Stops the client spinner whatever the handler does next.
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        debug!("Failed to answer callback {}: {}", q.id, e);
    }
    match telegram::callback_event(&q) {
        Some(event) => process_callback(&state, event).await,
        None => debug!("Callback {} has no usable message", q.id),
    }
    Ok(())
}

pub async fn handle_callback(
    state: &AppState,
    event: &CallbackEvent,
    data: CallbackData,
) -> BotResult<()> {
    let screen = Screen::of_callback(event);
    let actor = &event.sender;

    use CallbackData::*;
    match data {
        Tariffs => user::tariffs(state, screen).await,
        Product(id) => user::product(state, screen, id).await,
        Plan { product_id, months } => user::plan(state, screen, product_id, months).await,
        PayBalance { product_id, months } => {
            user::pay_with_balance(state, screen, actor, product_id, months).await
        }
        MySubs => user::my_subscriptions(state, screen, actor).await,
        Balance => user::balance(state, screen, actor).await,
        PromoEnter => user::promo_enter(state, screen, actor).await,
        Referral => user::referral(state, screen, actor).await,
        ReferralList(page) => user::referral_list(state, screen, actor, page).await,
        Support => user::support_hub(state, screen).await,
        SupportEnter => user::support_enter(state, screen, actor).await,
        SupportExit => user::support_exit(state, screen, actor).await,
        TicketSolve => user::ticket_solve(state, screen, actor).await,
        BackMain => user::main_menu(state, screen, actor).await,
        DeleteMsg => {
            if let Err(e) = state.transport.delete(event.chat_id, event.message_id).await {
                debug!("Could not delete {}: {}", event.message_id, e);
            }
            Ok(())
        }

        AdminPanel => {
            state.registry.exit_staff_flows(actor.id);
            admin::panel(state, screen).await
        }
        AdminStats => admin::stats(state, screen).await,
        Broadcast => admin::broadcast_start(state, screen, actor.id).await,
        BroadcastConfirm => admin::broadcast_confirm(state, screen, actor.id).await,
        BroadcastCancel => admin::broadcast_cancel(state, screen, actor.id).await,
        BroadcastStop => admin::broadcast_stop(state, event.chat_id).await,
        Issue => admin::issue_start(state, screen, actor.id, None).await,
        IssueProduct(id) => admin::issue_product(state, screen, actor.id, id).await,
        IssueDays(days) => admin::issue_days(state, screen, actor, days).await,
        IssueNoUser => admin::issue_without_user(state, screen, actor).await,
        IssueCancel => admin::issue_cancel(state, screen, actor.id).await,
        FindUser => admin::find_start(state, screen, actor.id).await,
        GiftUser(target) => admin::issue_start(state, screen, actor.id, Some(target)).await,
        AddBalance(target) => admin::add_balance_start(state, screen, actor.id, target).await,
        AddBalanceAmount { user, amount } => {
            admin::apply_top_up(state, screen, actor.id, user, amount as f64).await
        }
        ReplyTicket(target) => admin::reply_start(state, screen, actor.id, target).await,
        CancelReply => admin::reply_cancel(state, screen, actor.id).await,
        CloseTicket(target) => admin::close_ticket(state, event, target).await,
        PromoMenu => admin::promo_menu(state, screen, actor.id).await,
        PromoCreate => admin::promo_create_start(state, screen, actor.id).await,
        PromoList => admin::promo_list(state, screen).await,
        PromoDelete => admin::promo_delete_start(state, screen, actor.id).await,
        PromoStats => admin::promo_stats(state, screen).await,
        PromoCancel => admin::promo_menu(state, screen, actor.id).await,
        TopReferrers => admin::top_referrers(state, screen).await,
        FlashMenu => admin::flash_menu(state, screen, actor.id).await,
        FlashManual => admin::flash_manual(state, screen, actor.id).await,
        FlashPercent(percent) => admin::flash_percent(state, screen, actor.id, percent).await,
        FlashHours(hours) => admin::flash_hours(state, screen, actor.id, hours).await,
        FlashQuick { percent, hours } => {
            admin::launch_flash_sale(state, screen, actor.id, percent, hours).await
        }
        FlashConfirm => admin::flash_confirm(state, screen, actor.id).await,
        FlashCancel => admin::flash_cancel(state, screen, actor.id).await,
        FlashStop => admin::flash_stop(state, screen).await,
    }
}
