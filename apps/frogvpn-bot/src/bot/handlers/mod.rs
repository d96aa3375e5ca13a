//! Transport-independent handlers. The teloxide endpoints in [`command`] and
//! [`callback`] convert updates and hand them to [`process_message`] and
//! [`process_callback`].

use teloxide::utils::command::BotCommands;
use tracing::{debug, error, warn};

use crate::error::BotError;
use crate::event::{CallbackEvent, InboundEvent};
use crate::router;
use crate::state::AppState;
use crate::transport::{Content, OutgoingMessage};
use crate::triggers::{CallbackData, Command};

pub mod admin;
pub mod callback;
pub mod command;
pub mod user;

/// Where a screen is drawn: a fresh message, or over the menu whose button
/// was pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    New(i64),
    Replace {
        chat_id: i64,
        message_id: i32,
        is_media: bool,
    },
}

impl Screen {
    pub fn of_callback(event: &CallbackEvent) -> Self {
        Screen::Replace {
            chat_id: event.chat_id,
            message_id: event.message_id,
            is_media: event.message_is_media,
        }
    }
}

pub async fn show(state: &AppState, screen: Screen, message: OutgoingMessage) -> Result<(), BotError> {
    match screen {
        Screen::New(chat_id) => {
            state.transport.send(chat_id, message).await?;
        }
        Screen::Replace {
            chat_id,
            message_id,
            is_media: false,
        } if !message.content.is_media() => {
            let Content::Text(text) = message.content else {
                return Ok(());
            };
            // Editing to identical content is rejected by Telegram; nothing to redo.
            if let Err(e) = state
                .transport
                .edit_text(chat_id, message_id, text, message.keyboard)
                .await
            {
                debug!("Edit of {} in {} failed: {}", message_id, chat_id, e);
            }
        }
        Screen::Replace {
            chat_id,
            message_id,
            ..
        } => {
            if let Err(e) = state.transport.delete(chat_id, message_id).await {
                debug!("Could not delete {} in {}: {}", message_id, chat_id, e);
            }
            state.transport.send(chat_id, message).await?;
        }
    }
    Ok(())
}

pub async fn say(state: &AppState, chat_id: i64, text: impl Into<String>) -> Result<(), BotError> {
    state
        .transport
        .send(chat_id, OutgoingMessage::text(text))
        .await?;
    Ok(())
}

/// Turns a handler failure into the message the actor sees.
pub async fn report(state: &AppState, chat_id: i64, err: BotError) {
    let text = match &err {
        BotError::UserInputInvalid(reason) => {
            format!("❌ {}\n\nPlease try again:", capitalize(reason))
        }
        BotError::NotInFlow => "⌛ This action has expired. Please start over.".to_string(),
        BotError::AlreadyRunning => {
            "⏳ A broadcast is already running. Wait for it to finish or use /stopbroadcast."
                .to_string()
        }
        BotError::RouteNotFound => {
            debug!("Dropped unroutable message in {}", chat_id);
            return;
        }
        BotError::DeliveryFailed(e) => {
            warn!("Delivery failed while handling {}: {}", chat_id, e);
            return;
        }
        BotError::UpstreamUnavailable(e) => {
            error!("Upstream failure while handling {}: {}", chat_id, e);
            "⚠️ Service is temporarily unavailable. Please try again later.".to_string()
        }
    };
    if let Err(e) = state
        .transport
        .send(chat_id, OutgoingMessage::text(text))
        .await
    {
        warn!("Could not report error to {}: {}", chat_id, e);
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Commands first, then the flow router.
pub async fn process_message(state: &AppState, event: InboundEvent) {
    let command = event
        .text()
        .filter(|text| text.starts_with('/'))
        .and_then(|text| Command::parse(text, &state.bot_username()).ok());

    let result = match command {
        Some(command) => command::handle_command(state, &event, command).await,
        None => router::dispatch(state, &event).await,
    };
    if let Err(e) = result {
        report(state, event.chat_id, e).await;
    }
}

pub async fn process_callback(state: &AppState, event: CallbackEvent) {
    let Some(data) = CallbackData::parse(&event.data) else {
        debug!("Ignoring unknown callback payload {:?}", event.data);
        return;
    };
    if data.is_staff_only() && !state.is_staff(event.sender.id) {
        warn!("Non-staff {} pressed {:?}", event.sender.id, data);
        return;
    }
    if let Err(e) = callback::handle_callback(state, &event, data).await {
        report(state, event.chat_id, e).await;
    }
}
