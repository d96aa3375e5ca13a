//! Per-actor wizard state.
//!
//! Each flow kind owns a [`SlotStore`] with its own lock, so flows never
//! contend with each other and no code path holds two slot locks at once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{BotError, BotResult};
use crate::transport::OutgoingMessage;

pub struct SlotStore<S> {
    kind: &'static str,
    slots: Mutex<HashMap<i64, S>>,
}

impl<S: Clone> SlotStore<S> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Installs the slot, replacing whatever the actor had in this flow.
    pub fn enter(&self, actor: i64, state: S) {
        self.lock().insert(actor, state);
        debug!("{} entered {}", actor, self.kind);
    }

    /// Mutates an existing slot in place.
    pub fn advance<R>(&self, actor: i64, mutate: impl FnOnce(&mut S) -> R) -> BotResult<R> {
        let mut slots = self.lock();
        let state = slots.get_mut(&actor).ok_or(BotError::NotInFlow)?;
        Ok(mutate(state))
    }

    pub fn exit(&self, actor: i64) -> Option<S> {
        let state = self.lock().remove(&actor);
        if state.is_some() {
            debug!("{} left {}", actor, self.kind);
        }
        state
    }

    pub fn peek(&self, actor: i64) -> Option<S> {
        self.lock().get(&actor).cloned()
    }

    pub fn contains(&self, actor: i64) -> bool {
        self.lock().contains_key(&actor)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, S>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastDraft {
    AwaitingMessage,
    AwaitingConfirm(OutgoingMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromoDraft {
    Code,
    Amount { code: String },
    Activations { code: String, amount: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueStep {
    Product,
    Days { product_id: i64 },
    TargetUser { product_id: i64, days: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDraft {
    pub step: IssueStep,
    /// Set when the flow was opened from a user card; skips the id step.
    pub preset_target: Option<i64>,
}

impl IssueDraft {
    pub fn new(preset_target: Option<i64>) -> Self {
        Self {
            step: IssueStep::Product,
            preset_target,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self.step {
            IssueStep::Product => 1,
            IssueStep::Days { .. } => 2,
            IssueStep::TargetUser { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashDraft {
    pub percent: Option<u32>,
    pub hours: Option<u32>,
}

/// Every in-flight flow of every actor.
pub struct ConversationRegistry {
    pub broadcast: SlotStore<BroadcastDraft>,
    pub promo_create: SlotStore<PromoDraft>,
    pub promo_delete: SlotStore<()>,
    pub key_issuance: SlotStore<IssueDraft>,
    /// Target user of a manual top-up.
    pub balance_top_up: SlotStore<i64>,
    pub user_search: SlotStore<()>,
    /// Ticket owner a staff member is replying to.
    pub support_reply: SlotStore<i64>,
    pub promo_entry: SlotStore<()>,
    pub support_mode: SlotStore<()>,
    pub flash_sale: SlotStore<FlashDraft>,
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self {
            broadcast: SlotStore::new("broadcast"),
            promo_create: SlotStore::new("promo-create"),
            promo_delete: SlotStore::new("promo-delete"),
            key_issuance: SlotStore::new("key-issuance"),
            balance_top_up: SlotStore::new("balance-top-up"),
            user_search: SlotStore::new("user-search"),
            support_reply: SlotStore::new("support-reply"),
            promo_entry: SlotStore::new("promo-entry"),
            support_mode: SlotStore::new("support-mode"),
            flash_sale: SlotStore::new("flash-sale"),
        }
    }

    /// Drops every staff wizard of `actor`. Support mode is left alone.
    pub fn exit_staff_flows(&self, actor: i64) {
        self.broadcast.exit(actor);
        self.promo_create.exit(actor);
        self.promo_delete.exit(actor);
        self.key_issuance.exit(actor);
        self.balance_top_up.exit(actor);
        self.user_search.exit(actor);
        self.support_reply.exit(actor);
        self.flash_sale.exit(actor);
    }

    /// Clears the text-input staff flows before a new one is entered, so a
    /// stale wizard cannot claim the next message.
    pub fn exit_text_flows(&self, actor: i64) {
        self.promo_create.exit(actor);
        self.promo_delete.exit(actor);
        self.balance_top_up.exit(actor);
        self.user_search.exit(actor);
        self.support_reply.exit(actor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_then_peek_returns_state() {
        let registry = ConversationRegistry::new();
        registry.key_issuance.enter(555, IssueDraft::new(None));
        assert_eq!(registry.key_issuance.peek(555), Some(IssueDraft::new(None)));
        assert_eq!(registry.key_issuance.peek(556), None);
    }

    #[test]
    fn second_enter_replaces_first() {
        let registry = ConversationRegistry::new();
        registry.key_issuance.enter(
            1,
            IssueDraft {
                step: IssueStep::Days { product_id: 3 },
                preset_target: Some(9),
            },
        );
        registry.key_issuance.enter(1, IssueDraft::new(None));
        let state = registry.key_issuance.peek(1).unwrap();
        assert_eq!(state.ordinal(), 1);
        assert_eq!(state.preset_target, None);
    }

    #[test]
    fn advance_requires_an_active_slot() {
        let registry = ConversationRegistry::new();
        let err = registry.promo_create.advance(7, |_| ()).unwrap_err();
        assert!(matches!(err, BotError::NotInFlow));

        registry.promo_create.enter(7, PromoDraft::Code);
        registry
            .promo_create
            .advance(7, |draft| {
                *draft = PromoDraft::Amount {
                    code: "SPRING".into(),
                }
            })
            .unwrap();
        assert_eq!(
            registry.promo_create.peek(7),
            Some(PromoDraft::Amount {
                code: "SPRING".into()
            })
        );
    }

    #[test]
    fn exit_is_idempotent() {
        let registry = ConversationRegistry::new();
        assert!(registry.user_search.exit(1).is_none());
        registry.user_search.enter(1, ());
        assert!(registry.user_search.exit(1).is_some());
        assert!(registry.user_search.exit(1).is_none());
        assert_eq!(registry.user_search.len(), 0);
    }

    #[test]
    fn kinds_are_independent() {
        let registry = ConversationRegistry::new();
        registry.user_search.enter(1, ());
        registry.balance_top_up.enter(1, 42);
        registry.user_search.exit(1);
        assert_eq!(registry.balance_top_up.peek(1), Some(42));
    }

    #[test]
    fn staff_cleanup_keeps_support_mode() {
        let registry = ConversationRegistry::new();
        registry.support_mode.enter(1, ());
        registry.broadcast.enter(1, BroadcastDraft::AwaitingMessage);
        registry.flash_sale.enter(1, FlashDraft::default());
        registry.exit_staff_flows(1);
        assert!(registry.support_mode.contains(1));
        assert!(!registry.broadcast.contains(1));
        assert!(!registry.flash_sale.contains(1));
    }

    #[test]
    fn concurrent_actors_do_not_interfere() {
        let registry = std::sync::Arc::new(ConversationRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|actor| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for amount in 0..100 {
                        registry.balance_top_up.enter(actor, amount);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for actor in 0..8 {
            assert_eq!(registry.balance_top_up.peek(actor), Some(99));
        }
    }
}
