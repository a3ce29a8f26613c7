use anyhow::Result;

use crate::context::SmartContext;
use crate::store::View;

pub fn run(ctx: &SmartContext) -> Result<()> {
    let store = ctx.store();
    for view in View::ALL {
        println!("{:<32} {} rows", view.as_str(), store.view_count(view)?);
    }

    let tickets = store.ticket_contexts()?;
    if !tickets.is_empty() {
        println!(
            "\n{:<12} {:<8} {:<20} {:<6} {:<8} {:<6}",
            "Ticket", "Status", "Project", "Msgs", "Unsumm", "Extr"
        );
        println!("{}", "-".repeat(65));
        for t in tickets {
            println!(
                "{:<12} {:<8} {:<20} {:<6} {:<8} {:<6}",
                t.ticket_number,
                t.status,
                t.project_name,
                t.message_count,
                t.unsummarized_count,
                t.extraction_count
            );
        }
    }

    let pending = store.tickets_needing_extraction()?;
    if !pending.is_empty() {
        println!("\nNeeding extraction:");
        for row in pending {
            println!(
                "  {} ({} msgs, {} tokens)",
                row.ticket_number, row.unsummarized_count, row.unsummarized_tokens
            );
        }
    }

    let maps = store.projects_needing_map()?;
    if !maps.is_empty() {
        println!("\nNeeding a map:");
        for row in maps {
            let why = if row.has_map { "stale" } else { "missing" };
            println!("  {} ({})", row.name, why);
        }
    }
    Ok(())
}
