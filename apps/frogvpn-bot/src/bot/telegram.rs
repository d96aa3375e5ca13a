//! Teloxide side of the [`Transport`] seam and the update conversions.

use async_trait::async_trait;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId,
    ParseMode,
};
use teloxide::{ApiError, RequestError};
use tracing::warn;

use crate::event::{Actor, CallbackEvent, InboundEvent, QuotedMessage};
use crate::transport::{
    ButtonAction, Content, Keyboard, MediaSource, OutgoingMessage, Transport, TransportError,
};

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    let rows = keyboard.rows.iter().map(|row| {
        row.iter()
            .filter_map(|button| match &button.action {
                ButtonAction::Callback(data) => Some(InlineKeyboardButton::callback(
                    button.label.clone(),
                    data.clone(),
                )),
                ButtonAction::Url(url) => match url.parse::<Url>() {
                    Ok(url) => Some(InlineKeyboardButton::url(button.label.clone(), url)),
                    Err(e) => {
                        warn!("Dropping button {:?} with bad url {}: {}", button.label, url, e);
                        None
                    }
                },
            })
            .collect::<Vec<_>>()
    });
    InlineKeyboardMarkup::new(rows)
}

fn input_file(source: &MediaSource) -> Result<InputFile, TransportError> {
    match source {
        MediaSource::FileId(id) => Ok(InputFile::file_id(FileId(id.clone()))),
        MediaSource::Url(url) => url
            .parse::<Url>()
            .map(InputFile::url)
            .map_err(|e| TransportError::Api(format!("bad media url {}: {}", url, e))),
    }
}

fn map_err(err: RequestError) -> TransportError {
    match err {
        RequestError::Api(
            api @ (ApiError::BotBlocked
            | ApiError::UserDeactivated
            | ApiError::CantInitiateConversation
            | ApiError::ChatNotFound
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup),
        ) => TransportError::Unreachable(api.to_string()),
        other => TransportError::Api(other.to_string()),
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<i32, TransportError> {
        let chat = ChatId(chat_id);
        let keyboard = message.keyboard.as_ref().map(markup);

        // Each request type has its own builder, so the keyboard is attached per arm.
        let sent = match &message.content {
            Content::Text(text) => {
                let mut req = self
                    .bot
                    .send_message(chat, text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(kb) = keyboard {
                    req = req.reply_markup(kb);
                }
                req.await
            }
            Content::Photo { file, caption } => {
                let mut req = self
                    .bot
                    .send_photo(chat, input_file(file)?)
                    .parse_mode(ParseMode::Html);
                if let Some(caption) = caption {
                    req = req.caption(caption.clone());
                }
                if let Some(kb) = keyboard {
                    req = req.reply_markup(kb);
                }
                req.await
            }
            Content::Document { file, caption } => {
                let mut req = self
                    .bot
                    .send_document(chat, input_file(file)?)
                    .parse_mode(ParseMode::Html);
                if let Some(caption) = caption {
                    req = req.caption(caption.clone());
                }
                if let Some(kb) = keyboard {
                    req = req.reply_markup(kb);
                }
                req.await
            }
            Content::Video { file, caption } => {
                let mut req = self
                    .bot
                    .send_video(chat, input_file(file)?)
                    .parse_mode(ParseMode::Html);
                if let Some(caption) = caption {
                    req = req.caption(caption.clone());
                }
                if let Some(kb) = keyboard {
                    req = req.reply_markup(kb);
                }
                req.await
            }
            Content::Voice { file } => {
                let mut req = self.bot.send_voice(chat, input_file(file)?);
                if let Some(kb) = keyboard {
                    req = req.reply_markup(kb);
                }
                req.await
            }
        };
        sent.map(|msg| msg.id.0).map_err(map_err)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: String,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        let mut req = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(kb) = keyboard {
            req = req.reply_markup(markup(&kb));
        }
        req.await.map(|_| ()).map_err(map_err)
    }

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i32,
        caption: String,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        let mut req = self
            .bot
            .edit_message_caption(ChatId(chat_id), MessageId(message_id))
            .caption(caption)
            .parse_mode(ParseMode::Html);
        if let Some(kb) = keyboard {
            req = req.reply_markup(markup(&kb));
        }
        req.await.map(|_| ()).map_err(map_err)
    }

    async fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        keyboard: Keyboard,
    ) -> Result<(), TransportError> {
        self.bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id))
            .reply_markup(markup(&keyboard))
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn pin(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.bot
            .pin_chat_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(map_err)
    }
}

fn actor(user: &teloxide::types::User) -> Actor {
    Actor {
        id: user.id.0 as i64,
        username: user.username.clone(),
        full_name: user.full_name(),
    }
}

/// Text, photo, document, video and voice; anything else is `None`.
fn content(msg: &Message) -> Option<Content> {
    let caption = msg.caption().map(str::to_string);
    if let Some(text) = msg.text() {
        return Some(Content::Text(text.to_string()));
    }
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(Content::Photo {
            file: MediaSource::FileId(photo.file.id.0.clone()),
            caption,
        });
    }
    if let Some(doc) = msg.document() {
        return Some(Content::Document {
            file: MediaSource::FileId(doc.file.id.0.clone()),
            caption,
        });
    }
    if let Some(video) = msg.video() {
        return Some(Content::Video {
            file: MediaSource::FileId(video.file.id.0.clone()),
            caption,
        });
    }
    msg.voice().map(|voice| Content::Voice {
        file: MediaSource::FileId(voice.file.id.0.clone()),
    })
}

fn quoted(msg: &Message, depth: u8) -> QuotedMessage {
    QuotedMessage {
        message_id: msg.id.0,
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        forwarded_from: msg.forward_from_user().map(|u| u.id.0 as i64),
        reply_to: if depth == 0 {
            None
        } else {
            msg.reply_to_message()
                .map(|inner| Box::new(quoted(inner, depth - 1)))
        },
    }
}

pub fn inbound_event(msg: &Message) -> Option<InboundEvent> {
    let sender = actor(msg.from.as_ref()?);
    Some(InboundEvent {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        sender,
        content: content(msg)?,
        reply_to: msg.reply_to_message().map(|reply| quoted(reply, 1)),
    })
}

pub fn callback_event(q: &CallbackQuery) -> Option<CallbackEvent> {
    let message = q.message.as_ref()?;
    let regular = message.regular_message();
    Some(CallbackEvent {
        sender: actor(&q.from),
        chat_id: message.chat().id.0,
        message_id: message.id().0,
        message_body: regular.and_then(|m| m.text().or(m.caption()).map(str::to_string)),
        message_is_media: regular.map(|m| m.text().is_none()).unwrap_or(false),
        data: q.data.clone()?,
    })
}
