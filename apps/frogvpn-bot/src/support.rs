//! Relay between users and the staff support chat.
//!
//! A forwarded post carries the sender's id as a `#user_<id>` tag, and
//! staff replies are routed back by reading that tag from the post being
//! replied to. [`encode_tag`] and [`decode_tag`] are the only places that
//! know the format.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::conversation::ConversationRegistry;
use crate::error::{BotError, BotResult};
use crate::event::{Actor, QuotedMessage};
use crate::transport::{escape_html, Button, Content, Keyboard, OutgoingMessage, Transport};
use crate::triggers::CallbackData;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#user_(\d+)").expect("Failed to compile ticket tag regex"));

pub const DASHBOARD_LIMIT: usize = 15;

pub fn encode_tag(actor_id: i64) -> String {
    format!("#user_{}", actor_id)
}

/// First tag found in `text`.
pub fn decode_tag(text: &str) -> Option<i64> {
    TAG_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|id| id.as_str().parse().ok())
}

/// Recovers the ticket owner from the post a staff member replied to.
///
/// Looks at the post text, its caption, the original author of a forwarded
/// post and finally the text or caption of the message that post replied to.
pub fn route_target(quoted: &QuotedMessage) -> Option<i64> {
    let tagged = |m: &QuotedMessage| {
        m.text
            .as_deref()
            .and_then(decode_tag)
            .or_else(|| m.caption.as_deref().and_then(decode_tag))
    };
    tagged(quoted)
        .or(quoted.forwarded_from)
        .or_else(|| quoted.reply_to.as_deref().and_then(tagged))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Waiting,
    Replied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub actor_id: i64,
    pub display_name: String,
    pub last_activity: DateTime<Utc>,
    pub status: TicketStatus,
    /// Latest forwarded post in the staff chat.
    pub post_id: Option<i32>,
    pub message_count: u32,
}

#[derive(Default)]
struct Tickets {
    open: HashMap<i64, Ticket>,
    dashboard: Option<i32>,
}

/// Open tickets, one per actor, behind a single lock.
#[derive(Default)]
pub struct TicketRegistry {
    inner: Mutex<Tickets>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tickets> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert_waiting(
        &self,
        actor_id: i64,
        display_name: &str,
        post_id: Option<i32>,
        now: DateTime<Utc>,
    ) -> Ticket {
        let mut inner = self.lock();
        let ticket = inner.open.entry(actor_id).or_insert_with(|| Ticket {
            actor_id,
            display_name: display_name.to_string(),
            last_activity: now,
            status: TicketStatus::Waiting,
            post_id: None,
            message_count: 0,
        });
        ticket.display_name = display_name.to_string();
        ticket.last_activity = now;
        ticket.status = TicketStatus::Waiting;
        ticket.message_count += 1;
        if post_id.is_some() {
            ticket.post_id = post_id;
        }
        ticket.clone()
    }

    pub fn mark_replied(&self, actor_id: i64) -> bool {
        match self.lock().open.get_mut(&actor_id) {
            Some(ticket) => {
                ticket.status = TicketStatus::Replied;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, actor_id: i64) -> Option<Ticket> {
        self.lock().open.remove(&actor_id)
    }

    pub fn get(&self, actor_id: i64) -> Option<Ticket> {
        self.lock().open.get(&actor_id).cloned()
    }

    /// Waiting tickets first, oldest activity first within each group.
    pub fn snapshot(&self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self.lock().open.values().cloned().collect();
        tickets.sort_by(|a, b| {
            let rank = |t: &Ticket| (t.status != TicketStatus::Waiting) as u8;
            rank(a)
                .cmp(&rank(b))
                .then(a.last_activity.cmp(&b.last_activity))
                .then(a.actor_id.cmp(&b.actor_id))
        });
        tickets
    }

    pub fn waiting_count(&self) -> usize {
        self.lock()
            .open
            .values()
            .filter(|t| t.status == TicketStatus::Waiting)
            .count()
    }

    pub fn set_dashboard(&self, message_id: i32) {
        self.lock().dashboard = Some(message_id);
    }

    pub fn dashboard(&self) -> Option<i32> {
        self.lock().dashboard
    }
}

/// `-100XXXXXXXXXX` chat ids become `XXXXXXXXXX` in `t.me/c/` links.
pub fn link_chat_id(chat_id: i64) -> i64 {
    let id = chat_id.abs();
    if id > 1_000_000_000_000 {
        id - 1_000_000_000_000
    } else {
        id
    }
}

fn waited(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - since).num_minutes().max(0);
    match minutes {
        0 => "⏳ just now".to_string(),
        1..=59 => format!("⏳ waiting {} min", minutes),
        _ => format!("⏳ waiting {}h {}m", minutes / 60, minutes % 60),
    }
}

pub fn render_dashboard(tickets: &[Ticket], staff_chat: i64, now: DateTime<Utc>) -> String {
    if tickets.is_empty() {
        return "📊 <b>Support dashboard</b>\n\n✅ <b>No open tickets</b>\n\n<i>All caught up!</i>"
            .to_string();
    }

    let waiting = tickets
        .iter()
        .filter(|t| t.status == TicketStatus::Waiting)
        .count();
    let mut text = format!(
        "📊 <b>Support dashboard</b>\n\n🔥 <b>Waiting:</b> {}\n💬 <b>Open:</b> {}\n\n👇 <b>Tickets:</b>\n\n",
        waiting,
        tickets.len()
    );

    let link_id = link_chat_id(staff_chat);
    for (i, ticket) in tickets.iter().take(DASHBOARD_LIMIT).enumerate() {
        let (marker, status) = match ticket.status {
            TicketStatus::Waiting => ("🔴", waited(ticket.last_activity, now)),
            TicketStatus::Replied => ("🟢", "✅ replied".to_string()),
        };
        let link = ticket
            .post_id
            .map(|post| format!(" | <a href=\"https://t.me/c/{}/{}\">↗️ open</a>", link_id, post))
            .unwrap_or_default();
        text.push_str(&format!(
            "{}. {} <b>{}</b>\n   {}{}\n\n",
            i + 1,
            marker,
            escape_html(&ticket.display_name),
            status,
            link
        ));
    }
    if tickets.len() > DASHBOARD_LIMIT {
        text.push_str(&format!(
            "<i>... and {} more</i>",
            tickets.len() - DASHBOARD_LIMIT
        ));
    }
    text
}

/// The staff post a close was triggered from.
#[derive(Debug, Clone)]
pub struct StaffPost {
    pub message_id: i32,
    pub body: Option<String>,
    pub is_media: bool,
}

#[derive(Clone)]
pub struct SupportBridge {
    transport: Arc<dyn Transport>,
    tickets: Arc<TicketRegistry>,
    staff_chat: i64,
}

impl SupportBridge {
    pub fn new(transport: Arc<dyn Transport>, tickets: Arc<TicketRegistry>, staff_chat: i64) -> Self {
        Self {
            transport,
            tickets,
            staff_chat,
        }
    }

    pub fn staff_chat(&self) -> i64 {
        self.staff_chat
    }

    pub fn tickets(&self) -> &TicketRegistry {
        &self.tickets
    }

    /// Posts the user's message to the staff chat under a tagged header and
    /// marks their ticket as waiting. Returns the staff post id.
    pub async fn forward_to_staff(
        &self,
        actor: &Actor,
        balance: f64,
        content: &Content,
    ) -> BotResult<i32> {
        let header = format!(
            "🎫 {}\n👤 {} | 💰 {:.0} ₽\n━━━━━━━━━━━━━━━━━━━━\n",
            encode_tag(actor.id),
            escape_html(&actor.display_name()),
            balance
        );
        let body = content.body().map(escape_html).unwrap_or_default();
        let content = match content {
            // Voice notes cannot carry a caption, so the header goes first.
            Content::Voice { .. } => {
                self.transport
                    .send(self.staff_chat, OutgoingMessage::text(header.trim_end()))
                    .await?;
                content.clone()
            }
            _ => content.with_body(format!("{}{}", header, body)),
        };
        let keyboard = Keyboard::single(Button::callback(
            "✅ Close ticket",
            CallbackData::CloseTicket(actor.id).encode(),
        ));

        let post_id = self
            .transport
            .send(
                self.staff_chat,
                OutgoingMessage::new(content).with_keyboard(keyboard),
            )
            .await?;
        let ticket =
            self.tickets
                .upsert_waiting(actor.id, &actor.display_name(), Some(post_id), Utc::now());
        info!(
            "Ticket from {} forwarded as post {} ({} messages)",
            actor.id, post_id, ticket.message_count
        );
        self.refresh_dashboard().await;
        Ok(post_id)
    }

    /// Sends a staff reply back to the user named by the quoted post's tag.
    pub async fn route_staff_reply(
        &self,
        quoted: &QuotedMessage,
        reply: &Content,
    ) -> BotResult<i64> {
        let Some(target) = route_target(quoted) else {
            debug!(
                "Staff reply to post {} carries no ticket tag, dropping",
                quoted.message_id
            );
            return Err(BotError::RouteNotFound);
        };
        self.deliver_reply(target, reply).await?;
        Ok(target)
    }

    /// Delivers staff content to a user and flips their ticket to replied.
    pub async fn deliver_reply(&self, target: i64, reply: &Content) -> BotResult<()> {
        let content = match reply {
            Content::Text(text) => Content::Text(format!(
                "👨‍💻 <b>Support:</b>\n\n{}",
                escape_html(text)
            )),
            Content::Photo { caption: None, .. } => {
                reply.with_body("👨‍💻 <b>Support reply</b>".to_string())
            }
            other => match other.body() {
                Some(body) => other.with_body(escape_html(body)),
                None => other.clone(),
            },
        };
        let keyboard = Keyboard::new(vec![vec![
            Button::callback("✍️ Reply", CallbackData::SupportEnter.encode()),
            Button::callback("✅ Solved", CallbackData::TicketSolve.encode()),
        ]]);

        self.transport
            .send(target, OutgoingMessage::new(content).with_keyboard(keyboard))
            .await?;
        self.tickets.mark_replied(target);
        info!("Support reply delivered to {}", target);
        self.refresh_dashboard().await;
        Ok(())
    }

    /// Ends support mode and the ticket of `actor_id`, removing the close
    /// button from the staff post. Closing twice is a no-op.
    ///
    /// Returns whether a ticket was open.
    pub async fn close_ticket(
        &self,
        registry: &ConversationRegistry,
        actor_id: i64,
        staff_post: Option<StaffPost>,
        closed_by: &str,
    ) -> bool {
        registry.support_mode.exit(actor_id);
        let ticket = self.tickets.remove(actor_id);

        match staff_post {
            Some(post) => {
                let body = post.body.as_deref().map(escape_html).unwrap_or_default();
                let text = format!(
                    "✅ <b>Ticket closed</b>\n\n{}\n\n<i>Closed by: {}</i>",
                    body,
                    escape_html(closed_by)
                );
                let edited = if post.is_media {
                    self.transport
                        .edit_caption(self.staff_chat, post.message_id, text, Some(Keyboard::empty()))
                        .await
                } else {
                    self.transport
                        .edit_text(self.staff_chat, post.message_id, text, Some(Keyboard::empty()))
                        .await
                };
                if let Err(e) = edited {
                    debug!("Could not edit closed ticket post {}: {}", post.message_id, e);
                }
            }
            None => {
                if let Some(post_id) = ticket.as_ref().and_then(|t| t.post_id) {
                    if let Err(e) = self
                        .transport
                        .edit_keyboard(self.staff_chat, post_id, Keyboard::empty())
                        .await
                    {
                        debug!("Could not strip buttons of ticket post {}: {}", post_id, e);
                    }
                }
            }
        }

        if ticket.is_some() {
            info!("Ticket of {} closed by {}", actor_id, closed_by);
            self.refresh_dashboard().await;
        }
        ticket.is_some()
    }

    /// Posts and pins a fresh dashboard in the staff chat.
    pub async fn init_dashboard(&self) -> BotResult<i32> {
        let text = render_dashboard(&self.tickets.snapshot(), self.staff_chat, Utc::now());
        let message_id = self
            .transport
            .send(self.staff_chat, OutgoingMessage::text(text))
            .await?;
        if let Err(e) = self.transport.pin(self.staff_chat, message_id).await {
            warn!("Failed to pin support dashboard: {}", e);
        }
        self.tickets.set_dashboard(message_id);
        Ok(message_id)
    }

    pub async fn refresh_dashboard(&self) {
        let Some(message_id) = self.tickets.dashboard() else {
            return;
        };
        let text = render_dashboard(&self.tickets.snapshot(), self.staff_chat, Utc::now());
        if let Err(e) = self
            .transport
            .edit_text(self.staff_chat, message_id, text, None)
            .await
        {
            debug!("Dashboard refresh failed: {}", e);
        }
    }
}
