//! Smart history selection
//!
//! Picks the newest contiguous run of unsummarized messages that fits the
//! budget, behind a synthetic entry carrying the latest extraction summary.
//! The summary is never dropped; raw messages go oldest first.

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::ConversationMessage;
use crate::store::ContextStore;

#[derive(Clone)]
pub struct HistorySelector {
    store: ContextStore,
}

impl HistorySelector {
    pub fn new(store: ContextStore) -> Self {
        Self { store }
    }

    /// Budgeted history for a ticket, ascending by id with the summary first
    ///
    /// Pure read: repeated calls return the same sequence unless something
    /// was written in between.
    pub fn get_smart_history(
        &self,
        ticket_id: i64,
        token_budget: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let (messages, latest) = self.store.history_snapshot(ticket_id)?;
        let summary = latest.as_ref().map(ConversationMessage::summary_of);
        let total = messages.len();

        let selected = select_within_budget(summary, messages, token_budget);
        debug!(
            ticket_id,
            token_budget,
            available = total,
            selected = selected.len(),
            "smart history selected"
        );
        Ok(selected)
    }
}

/// Budget walk shared by the selector and its tests
///
/// Total cost stays within `token_budget` except when the newest message
/// alone exceeds it; that message is returned anyway rather than silently
/// dropped.
pub fn select_within_budget(
    summary: Option<ConversationMessage>,
    messages: Vec<ConversationMessage>,
    token_budget: usize,
) -> Vec<ConversationMessage> {
    let reserved = summary.as_ref().map_or(0, |s| s.token_count);
    let available = token_budget.saturating_sub(reserved);

    let mut used = 0usize;
    let mut keep_from = messages.len();
    for (idx, msg) in messages.iter().enumerate().rev() {
        if used + msg.token_count > available {
            break;
        }
        used += msg.token_count;
        keep_from = idx;
    }

    if keep_from == messages.len() {
        if let Some(newest) = messages.last() {
            if newest.token_count > token_budget {
                warn!(
                    message_id = newest.id,
                    tokens = newest.token_count,
                    token_budget,
                    "single message exceeds history budget, keeping it"
                );
                keep_from = messages.len() - 1;
            }
        }
    }

    let mut selected = Vec::with_capacity(messages.len() - keep_from + 1);
    selected.extend(summary);
    selected.extend(messages.into_iter().skip(keep_from));
    selected
}

/// Total estimated cost of a history sequence
pub fn history_tokens(history: &[ConversationMessage]) -> usize {
    history.iter().map(|m| m.token_count).sum()
}
