use anyhow::Result;

use super::{print_messages, resolve_ticket};
use crate::context::SmartContext;

pub fn run(ctx: &SmartContext, ticket: String, user_id: String, budget: Option<usize>) -> Result<()> {
    let ticket = resolve_ticket(ctx.store(), &ticket)?;
    let full = match budget {
        Some(budget) => ctx.build_full_context(&ticket, &user_id, budget)?,
        None => ctx.default_context(&ticket, &user_id)?,
    };

    if full.system_context.is_empty() {
        println!("(no system context)");
    } else {
        println!("{}", full.system_context);
    }
    println!("\n--- history ---");
    print_messages(&full.history);
    println!(
        "\nsystem: {} tokens, history: {} tokens, total: {}",
        full.system_tokens,
        full.history_tokens,
        full.system_tokens + full.history_tokens
    );
    Ok(())
}
