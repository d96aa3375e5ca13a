//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use frogvpn_db::MemoryStore;

use crate::config::Config;
use crate::event::{Actor, CallbackEvent, InboundEvent, QuotedMessage};
use crate::provider::MockVpnProvider;
use crate::state::AppState;
use crate::transport::{Content, Keyboard, OutgoingMessage, Transport, TransportError};

pub const ADMIN: i64 = 1000;
pub const SUPPORT_CHAT: i64 = -1003561858830;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Text { chat_id: i64, message_id: i32, text: String, keyboard: Option<Keyboard> },
    Caption { chat_id: i64, message_id: i32, caption: String, keyboard: Option<Keyboard> },
    Keyboard { chat_id: i64, message_id: i32, keyboard: Keyboard },
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(i64, OutgoingMessage)>>,
    edits: Mutex<Vec<Edit>>,
    pinned: Mutex<Vec<(i64, i32)>>,
    failures: Mutex<HashMap<i64, TransportError>>,
    next_id: AtomicI32,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, chat_id: i64, err: TransportError) {
        self.failures.lock().unwrap().insert(chat_id, err);
    }

    pub fn sent(&self) -> Vec<(i64, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<OutgoingMessage> {
        self.sent()
            .into_iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, msg)| msg)
            .collect()
    }

    /// Bodies (text or caption) of everything sent to `chat_id`.
    pub fn bodies_to(&self, chat_id: i64) -> Vec<String> {
        self.sent_to(chat_id)
            .iter()
            .filter_map(|msg| msg.content.body().map(str::to_string))
            .collect()
    }

    pub fn last_body_to(&self, chat_id: i64) -> Option<String> {
        self.bodies_to(chat_id).pop()
    }

    pub fn edits(&self) -> Vec<Edit> {
        self.edits.lock().unwrap().clone()
    }

    pub fn pinned(&self) -> Vec<(i64, i32)> {
        self.pinned.lock().unwrap().clone()
    }

    fn check(&self, chat_id: i64) -> Result<(), TransportError> {
        match self.failures.lock().unwrap().get(&chat_id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<i32, TransportError> {
        self.check(chat_id)?;
        self.sent.lock().unwrap().push((chat_id, message));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: String,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        self.check(chat_id)?;
        self.edits.lock().unwrap().push(Edit::Text {
            chat_id,
            message_id,
            text,
            keyboard,
        });
        Ok(())
    }

    async fn edit_caption(
        &self,
        chat_id: i64,
        message_id: i32,
        caption: String,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        self.check(chat_id)?;
        self.edits.lock().unwrap().push(Edit::Caption {
            chat_id,
            message_id,
            caption,
            keyboard,
        });
        Ok(())
    }

    async fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        keyboard: Keyboard,
    ) -> Result<(), TransportError> {
        self.check(chat_id)?;
        self.edits.lock().unwrap().push(Edit::Keyboard {
            chat_id,
            message_id,
            keyboard,
        });
        Ok(())
    }

    async fn delete(&self, chat_id: i64, _message_id: i32) -> Result<(), TransportError> {
        self.check(chat_id)
    }

    async fn pin(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.check(chat_id)?;
        self.pinned.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }
}

pub struct Harness {
    pub state: AppState,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MockVpnProvider>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.telegram.token = "test-token".into();
    config.telegram.admin_ids = vec![ADMIN];
    config.support.group_id = SUPPORT_CHAT;
    config
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: Config) -> Harness {
    let transport = RecordingTransport::new();
    let store = Arc::new(MemoryStore::with_default_catalog());
    let provider = Arc::new(MockVpnProvider::new());
    let state = AppState::new(
        config,
        transport.clone(),
        store.clone(),
        provider.clone(),
    );
    Harness {
        state,
        transport,
        store,
        provider,
    }
}

pub fn actor(id: i64, username: &str) -> Actor {
    Actor {
        id,
        username: Some(username.to_string()),
        full_name: username.to_string(),
    }
}

pub fn text_from(sender: Actor, text: &str) -> InboundEvent {
    InboundEvent {
        chat_id: sender.id,
        message_id: 1,
        sender,
        content: Content::Text(text.to_string()),
        reply_to: None,
    }
}

/// A staff message in the support chat replying to `quoted`.
pub fn staff_reply(staff: i64, quoted: QuotedMessage, text: &str) -> InboundEvent {
    InboundEvent {
        chat_id: SUPPORT_CHAT,
        message_id: 99,
        sender: actor(staff, "staff"),
        content: Content::Text(text.to_string()),
        reply_to: Some(quoted),
    }
}

pub fn callback(sender: Actor, data: &str) -> CallbackEvent {
    CallbackEvent {
        chat_id: sender.id,
        sender,
        message_id: 7,
        message_body: Some("menu".into()),
        message_is_media: false,
        data: data.to_string(),
    }
}
