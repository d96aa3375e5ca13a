//! Chat transport seam.
//!
//! Handlers and background jobs only talk to [`Transport`]; the Telegram
//! adapter lives in `bot::telegram` and tests use a recording double.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The recipient blocked the bot or the account is gone. Retrying is pointless.
    #[error("recipient unreachable: {0}")]
    Unreachable(String),
    #[error("transport error: {0}")]
    Api(String),
}

impl TransportError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TransportError::Unreachable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    FileId(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Photo { file: MediaSource, caption: Option<String> },
    Document { file: MediaSource, caption: Option<String> },
    Video { file: MediaSource, caption: Option<String> },
    Voice { file: MediaSource },
}

impl Content {
    /// The text for text messages, the caption for media.
    pub fn body(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Photo { caption, .. }
            | Content::Document { caption, .. }
            | Content::Video { caption, .. } => caption.as_deref(),
            Content::Voice { .. } => None,
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, Content::Text(_))
    }

    /// Same content with its text or caption replaced.
    pub fn with_body(&self, body: String) -> Content {
        match self {
            Content::Text(_) => Content::Text(body),
            Content::Photo { file, .. } => Content::Photo {
                file: file.clone(),
                caption: Some(body),
            },
            Content::Document { file, .. } => Content::Document {
                file: file.clone(),
                caption: Some(body),
            },
            Content::Video { file, .. } => Content::Video {
                file: file.clone(),
                caption: Some(body),
            },
            Content::Voice { file } => Content::Voice { file: file.clone() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Inline keyboard. An empty keyboard on an edit removes the buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(button: Button) -> Self {
        Self::new(vec![vec![button]])
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: Content,
    pub keyboard: Option<Keyboard>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Content::Text(text.into()),
            keyboard: None,
        }
    }

    pub fn new(content: Content) -> Self {
        Self {
            content,
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Outbound side of the chat. Implementations must tolerate concurrent callers:
/// the dispatcher, broadcasts and the watchdog share one instance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a message and returns its id.
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<i32, TransportError>;

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: String,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i32,
        caption: String,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;

    /// Replaces the buttons only; an empty keyboard removes them.
    async fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        keyboard: Keyboard,
    ) -> Result<(), TransportError>;

    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    async fn pin(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError>;
}

/// Escapes text for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(ch),
        }
    }
    out
}
