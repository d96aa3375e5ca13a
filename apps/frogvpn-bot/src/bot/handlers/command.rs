use teloxide::prelude::*;
use tracing::{info, warn};

use super::{admin, process_message, say, user, Screen};
use crate::bot::telegram;
use crate::error::{BotError, BotResult};
use crate::event::InboundEvent;
use crate::flash_sale;
use crate::services::admin_service::parse_addbal_args;
use crate::state::AppState;
use crate::triggers::Command;

pub async fn message_handler(
    _bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    info!("Received message in {}: {:?}", msg.chat.id, msg.text());
    match telegram::inbound_event(&msg) {
        Some(event) => process_message(&state, event).await,
        None => info!("Skipping unsupported message {} in {}", msg.id, msg.chat.id),
    }
    Ok(())
}

fn is_staff_command(command: &Command) -> bool {
    !matches!(
        command,
        Command::Start(_) | Command::StopSupport | Command::Cancel
    )
}

pub async fn handle_command(state: &AppState, event: &InboundEvent, command: Command) -> BotResult<()> {
    let actor = &event.sender;
    let screen = Screen::New(event.chat_id);

    if is_staff_command(&command) && !state.is_staff(actor.id) {
        warn!("Non-staff {} tried {:?}", actor.id, command);
        return Ok(());
    }

    match command {
        Command::Start(args) => user::start(state, event, &args).await,
        Command::StopSupport => {
            if state.registry.support_mode.exit(actor.id).is_some() {
                say(state, event.chat_id, "🚪 You left the support chat.").await
            } else {
                say(state, event.chat_id, "ℹ️ You are not in a support chat.").await
            }
        }
        Command::Cancel => {
            state.registry.exit_staff_flows(actor.id);
            state.registry.promo_entry.exit(actor.id);
            say(state, event.chat_id, "❌ Cancelled.").await
        }
        Command::Admin => {
            state.registry.exit_staff_flows(actor.id);
            admin::panel(state, screen).await
        }
        Command::Stats => admin::stats(state, screen).await,
        Command::Broadcast => admin::broadcast_start(state, screen, actor.id).await,
        Command::StopBroadcast => admin::broadcast_stop(state, event.chat_id).await,
        Command::Issue => admin::issue_start(state, screen, actor.id, None).await,
        Command::Find(query) => {
            if query.trim().is_empty() {
                admin::find_start(state, screen, actor.id).await
            } else {
                admin::find_user(state, event.chat_id, &query).await
            }
        }
        Command::AddBal(args) => {
            let (target, amount) = parse_addbal_args(&args)?;
            admin::apply_top_up(state, screen, actor.id, target, amount).await
        }
        Command::FlashSale(args) => {
            if args.trim().is_empty() {
                admin::flash_menu(state, screen, actor.id).await
            } else {
                let (percent, hours) = flash_sale::parse_args(&args)?;
                admin::launch_flash_sale(state, screen, actor.id, percent, hours).await
            }
        }
        Command::StopSale => admin::flash_stop(state, screen).await,
        Command::InitDashboard => {
            if event.chat_id != state.support.staff_chat() {
                return Err(BotError::invalid("run this command inside the support chat"));
            }
            state.support.init_dashboard().await?;
            Ok(())
        }
        Command::WatchdogTest => {
            state.watchdog.test_alert().await;
            say(state, event.chat_id, "✅ Test alert sent to every admin.").await
        }
    }
}
