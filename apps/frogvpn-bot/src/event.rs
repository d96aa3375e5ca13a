//! Transport-independent view of inbound updates.

use crate::transport::Content;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub username: Option<String>,
    pub full_name: String,
}

impl Actor {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            username: None,
            full_name: String::new(),
        }
    }

    pub fn display_name(&self) -> String {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => format!("@{}", name),
            _ if !self.full_name.is_empty() => self.full_name.clone(),
            _ => self.id.to_string(),
        }
    }
}

/// A message being replied to, with one more level of nesting at most.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotedMessage {
    pub message_id: i32,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Original author when the quoted message was forwarded from a user.
    pub forwarded_from: Option<i64>,
    pub reply_to: Option<Box<QuotedMessage>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub message_id: i32,
    pub sender: Actor,
    pub content: Content,
    pub reply_to: Option<QuotedMessage>,
}

impl InboundEvent {
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEvent {
    pub sender: Actor,
    pub chat_id: i64,
    pub message_id: i32,
    /// Text or caption of the message carrying the button.
    pub message_body: Option<String>,
    pub message_is_media: bool,
    pub data: String,
}
