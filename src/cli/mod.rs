//! Command implementations for the `ticketctx` binary

pub mod context;
pub mod extract;
pub mod history;
pub mod prefs;
pub mod project;
pub mod ticket;
pub mod views;

use anyhow::Result;

use crate::model::{ConversationMessage, Ticket};
use crate::store::ContextStore;

/// Find a ticket by numeric id or ticket number
pub(crate) fn resolve_ticket(store: &ContextStore, query: &str) -> Result<Ticket> {
    store
        .find_ticket(query)?
        .ok_or_else(|| anyhow::anyhow!("Ticket not found: {}", query))
}

pub(crate) fn print_messages(messages: &[ConversationMessage]) {
    for msg in messages {
        let tag = if msg.is_summary {
            "summary".to_string()
        } else {
            format!("#{}", msg.id)
        };
        println!(
            "[{:<9}] {:<9} ({} tok) {}",
            tag,
            msg.role.as_str(),
            msg.token_count,
            preview(&msg.content, 100)
        );
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn tickets_resolve_by_id_or_number() {
        let fx = Fixture::new();
        let by_number = resolve_ticket(&fx.store, "TKT-001").unwrap();
        let by_id = resolve_ticket(&fx.store, &fx.ticket_id.to_string()).unwrap();
        assert_eq!(by_number.id, by_id.id);
        assert!(resolve_ticket(&fx.store, "TKT-404").is_err());
    }

    #[test]
    fn preview_flattens_and_clips() {
        assert_eq!(preview("a\nb", 10), "a b");
        assert_eq!(preview(&"x".repeat(20), 10), format!("{}...", "x".repeat(7)));
    }
}
