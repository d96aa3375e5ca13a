//! Decides which flow owns an inbound message.
//!
//! Order, first match wins:
//! 1. reply inside the staff chat: staff answering a ticket
//! 2. non-staff with promo entry open, text only
//! 3. support mode, staff included
//! 4. any other non-staff message is dropped
//! 5. staff replying to a ticket from the private chat
//! 6. staff composing a broadcast
//! 7. staff text wizards: top-up amount, user search, key recipient,
//!    promo wizard, promo deletion

use tracing::debug;

use crate::bot::handlers::{admin, user};
use crate::conversation::{BroadcastDraft, IssueStep};
use crate::error::BotResult;
use crate::event::InboundEvent;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    StaffReply,
    PromoEntry,
    SupportForward,
    SupportReply { target: i64 },
    BroadcastCapture,
    BalanceAmount { target: i64 },
    UserSearch,
    IssueUserId,
    PromoWizard,
    PromoDelete,
    /// Non-staff message outside every flow.
    Drop,
    /// Staff message nobody claimed.
    Ignore,
}

/// Pure lookup: reads slots, never changes them.
pub fn resolve_route(state: &AppState, event: &InboundEvent) -> Route {
    let actor = event.sender.id;
    let registry = &state.registry;
    let staff = state.is_staff(actor);
    let is_text = event.text().is_some();

    if event.chat_id == state.support.staff_chat() {
        return if event.reply_to.is_some() {
            Route::StaffReply
        } else {
            Route::Ignore
        };
    }
    if !staff && is_text && registry.promo_entry.contains(actor) {
        return Route::PromoEntry;
    }
    if registry.support_mode.contains(actor) {
        return Route::SupportForward;
    }
    if !staff {
        return Route::Drop;
    }
    if let Some(target) = registry.support_reply.peek(actor) {
        return Route::SupportReply { target };
    }
    if registry.broadcast.peek(actor) == Some(BroadcastDraft::AwaitingMessage) {
        return Route::BroadcastCapture;
    }
    if !is_text {
        return Route::Ignore;
    }
    if let Some(target) = registry.balance_top_up.peek(actor) {
        return Route::BalanceAmount { target };
    }
    if registry.user_search.contains(actor) {
        return Route::UserSearch;
    }
    if let Some(draft) = registry.key_issuance.peek(actor) {
        if matches!(draft.step, IssueStep::TargetUser { .. }) {
            return Route::IssueUserId;
        }
    }
    if registry.promo_create.contains(actor) {
        return Route::PromoWizard;
    }
    if registry.promo_delete.contains(actor) {
        return Route::PromoDelete;
    }
    Route::Ignore
}

pub async fn dispatch(state: &AppState, event: &InboundEvent) -> BotResult<()> {
    let route = resolve_route(state, event);
    debug!("Message {} from {} routed to {:?}", event.message_id, event.sender.id, route);
    match route {
        Route::StaffReply => admin::staff_chat_reply(state, event).await,
        Route::PromoEntry => user::redeem_promo(state, event).await,
        Route::SupportForward => user::forward_to_support(state, event).await,
        Route::SupportReply { target } => admin::reply_to_ticket(state, event, target).await,
        Route::BroadcastCapture => admin::capture_broadcast(state, event).await,
        Route::BalanceAmount { target } => admin::balance_amount(state, event, target).await,
        Route::UserSearch => admin::search_input(state, event).await,
        Route::IssueUserId => admin::issue_user_id(state, event).await,
        Route::PromoWizard => admin::promo_wizard_step(state, event).await,
        Route::PromoDelete => admin::promo_delete_input(state, event).await,
        Route::Drop | Route::Ignore => Ok(()),
    }
}
