use anyhow::Result;

use super::{print_messages, resolve_ticket};
use crate::context::{history_tokens, SmartContext};

pub fn run(ctx: &SmartContext, ticket: String, budget: Option<usize>) -> Result<()> {
    let ticket = resolve_ticket(ctx.store(), &ticket)?;
    let history = match budget {
        Some(budget) => ctx.get_smart_history(ticket.id, budget)?,
        None => ctx.default_history(ticket.id)?,
    };

    if history.is_empty() {
        println!("No history for {}.", ticket.ticket_number);
        return Ok(());
    }

    print_messages(&history);
    println!(
        "\n{} entries, {} tokens",
        history.len(),
        history_tokens(&history)
    );
    Ok(())
}
