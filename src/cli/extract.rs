//! Extract command implementation

use anyhow::Result;

use super::resolve_ticket;
use crate::context::{ExtractionOutcome, SmartContext};
use crate::model::Extraction;

/// Summarize one ticket's oldest unsummarized messages
///
/// Without a limit the configured batch is used, which leaves the most recent
/// messages raw.
pub fn run(ctx: &SmartContext, ticket: String, limit: Option<usize>) -> Result<()> {
    let ticket = resolve_ticket(ctx.store(), &ticket)?;
    let batch = match limit {
        Some(limit) => ctx.store().unsummarized_messages(ticket.id, Some(limit))?,
        None => ctx.next_batch(ticket.id)?,
    };

    if batch.is_empty() {
        println!("Nothing to extract for {}.", ticket.ticket_number);
        return Ok(());
    }

    let extraction = ctx.create_extraction(ticket.id, &batch)?;
    print_extraction(&ticket.ticket_number, &extraction);
    Ok(())
}

pub fn pending(ctx: &SmartContext) -> Result<()> {
    let outcomes = ctx.extract_pending()?;
    if outcomes.is_empty() {
        println!("No tickets need extraction.");
        return Ok(());
    }

    let mut failed = 0;
    for entry in outcomes {
        match entry.outcome {
            ExtractionOutcome::Extracted(extraction) => {
                print_extraction(&entry.ticket_number, &extraction)
            }
            ExtractionOutcome::NothingToExtract => {
                println!("{}: nothing outside the recent window", entry.ticket_number)
            }
            ExtractionOutcome::Failed(e) => {
                failed += 1;
                println!("{}: failed: {}", entry.ticket_number, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} ticket(s) failed to extract", failed);
    }
    Ok(())
}

fn print_extraction(ticket_number: &str, extraction: &Extraction) {
    println!(
        "{}: extraction #{} summarized {} messages ({} -> {} tokens)",
        ticket_number,
        extraction.id,
        extraction.messages_summarized,
        extraction.tokens_before,
        extraction.tokens_after
    );
    for decision in &extraction.decisions {
        println!("   decision: {}", decision);
    }
    for file in &extraction.files_modified {
        println!("   file:     {}", file);
    }
    for gotcha in &extraction.known_gotchas {
        println!("   gotcha:   {}", gotcha);
    }
}
