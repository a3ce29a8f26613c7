//! Extraction engine
//!
//! Compresses a batch of raw messages into one [`Extraction`] and marks the
//! batch summarized in the same transaction. The engine never hands state to
//! the history selector directly; the selector only sees what was committed.

mod scanner;

pub use scanner::{
    DecisionScanner, FilePathScanner, Findings, GotchaScanner, Scanner, ScannerSet,
};

use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::clip;
use crate::config::ExtractionConfig;
use crate::error::{ContextError, Result};
use crate::model::{ConversationMessage, Extraction, NewExtraction, Role};
use crate::store::ContextStore;
use crate::tokens::{count_tokens, max_chars_for, truncate_chars};

/// Longest excerpt quoted from a single message in the summary
const EXCERPT_CHARS: usize = 160;

/// What happened to one ticket during a batch run
#[derive(Debug)]
pub enum ExtractionOutcome {
    Extracted(Extraction),
    NothingToExtract,
    Failed(ContextError),
}

#[derive(Debug)]
pub struct TicketOutcome {
    pub ticket_id: i64,
    pub ticket_number: String,
    pub outcome: ExtractionOutcome,
}

pub struct ExtractionEngine {
    store: ContextStore,
    scanners: ScannerSet,
    batch_size: usize,
    keep_recent: usize,
    summary_max_chars: usize,
}

impl ExtractionEngine {
    pub fn new(store: ContextStore, config: &ExtractionConfig) -> Self {
        Self {
            store,
            scanners: ScannerSet::heuristic(),
            batch_size: config.batch_size,
            keep_recent: config.keep_recent,
            summary_max_chars: config.summary_max_chars,
        }
    }

    pub fn with_scanners(mut self, scanners: ScannerSet) -> Self {
        self.scanners = scanners;
        self
    }

    /// Summarize `messages` and mark them consumed
    ///
    /// Rejects the batch before writing anything if it is empty, contains a
    /// synthetic summary entry, mixes tickets, repeats a message or holds an
    /// already summarized one. On any failure no message is marked, so the
    /// same batch can be retried.
    pub fn create_extraction(
        &self,
        ticket_id: i64,
        messages: &[ConversationMessage],
    ) -> Result<Extraction> {
        validate_batch(ticket_id, messages)?;

        let new = self.summarize(ticket_id, messages);
        let extraction = self.store.persist_extraction(&new, messages)?;

        info!(
            ticket_id,
            extraction_id = extraction.id,
            messages = extraction.messages_summarized,
            tokens_before = extraction.tokens_before,
            tokens_after = extraction.tokens_after,
            "extraction created"
        );
        Ok(extraction)
    }

    /// Build the extraction content for a batch without touching the store
    pub fn summarize(&self, ticket_id: i64, messages: &[ConversationMessage]) -> NewExtraction {
        let tokens_before: usize = messages.iter().map(|m| m.token_count).sum();

        let text = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let findings = self.scanners.scan(&text);
        debug!(
            ticket_id,
            decisions = findings.decisions.len(),
            files = findings.files.len(),
            gotchas = findings.gotchas.len(),
            "scanned batch"
        );

        let mut summary = render_summary(messages, &findings, self.summary_max_chars);
        if count_tokens(&summary) > tokens_before {
            summary = truncate_chars(&summary, max_chars_for(tokens_before)).to_string();
        }
        let tokens_after = count_tokens(&summary);

        NewExtraction {
            ticket_id,
            tokens_before,
            tokens_after,
            decisions: findings.decisions,
            files_modified: findings.files,
            known_gotchas: findings.gotchas,
            summary,
        }
    }

    /// Oldest unsummarized messages eligible for the next extraction
    ///
    /// The newest `keep_recent` messages stay raw; at most `batch_size` are
    /// returned.
    pub fn next_batch(&self, ticket_id: i64) -> Result<Vec<ConversationMessage>> {
        let mut messages = self.store.unsummarized_messages(ticket_id, None)?;
        let eligible = messages
            .len()
            .saturating_sub(self.keep_recent)
            .min(self.batch_size);
        messages.truncate(eligible);
        Ok(messages)
    }

    /// Extract every ticket listed by `v_tickets_needing_extraction`
    ///
    /// A failure on one ticket is recorded in its outcome and does not stop
    /// the run. Only listing the pending tickets can fail the whole call.
    pub fn extract_pending(&self) -> Result<Vec<TicketOutcome>> {
        let pending = self.store.tickets_needing_extraction()?;
        info!(tickets = pending.len(), "running pending extractions");

        let outcomes = pending
            .into_iter()
            .map(|row| {
                let outcome = match self.next_batch(row.ticket_id) {
                    Ok(batch) if batch.is_empty() => ExtractionOutcome::NothingToExtract,
                    Ok(batch) => match self.create_extraction(row.ticket_id, &batch) {
                        Ok(extraction) => ExtractionOutcome::Extracted(extraction),
                        Err(e) => {
                            warn!(ticket_id = row.ticket_id, error = %e, "extraction failed");
                            ExtractionOutcome::Failed(e)
                        }
                    },
                    Err(e) => {
                        warn!(ticket_id = row.ticket_id, error = %e, "batch selection failed");
                        ExtractionOutcome::Failed(e)
                    }
                };
                TicketOutcome {
                    ticket_id: row.ticket_id,
                    ticket_number: row.ticket_number,
                    outcome,
                }
            })
            .collect();

        Ok(outcomes)
    }
}

fn validate_batch(ticket_id: i64, messages: &[ConversationMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(ContextError::EmptyBatch { ticket_id });
    }

    let mut seen = HashSet::with_capacity(messages.len());
    for msg in messages {
        if msg.is_summary {
            return Err(ContextError::InvariantViolation(
                "synthetic summary entries cannot be extracted".into(),
            ));
        }
        if msg.ticket_id != ticket_id {
            return Err(ContextError::InvariantViolation(format!(
                "message {} belongs to ticket {}, not {}",
                msg.id, msg.ticket_id, ticket_id
            )));
        }
        if msg.is_summarized {
            return Err(ContextError::InvariantViolation(format!(
                "message {} is already summarized",
                msg.id
            )));
        }
        if !seen.insert(msg.id) {
            return Err(ContextError::InvariantViolation(format!(
                "message {} appears twice in the batch",
                msg.id
            )));
        }
    }
    Ok(())
}

fn render_summary(messages: &[ConversationMessage], findings: &Findings, max_chars: usize) -> String {
    let first_id = messages.iter().map(|m| m.id).min().unwrap_or_default();
    let last_id = messages.iter().map(|m| m.id).max().unwrap_or_default();
    let from_user = messages.iter().filter(|m| m.role == Role::User).count();
    let from_assistant = messages.iter().filter(|m| m.role == Role::Assistant).count();

    let mut lines = vec![format!(
        "Summary of {} earlier messages (#{first_id}-#{last_id}; {from_user} user, {from_assistant} assistant).",
        messages.len()
    )];

    if !findings.decisions.is_empty() {
        lines.push(format!("Decisions: {}", findings.decisions.join("; ")));
    }
    if !findings.files.is_empty() {
        lines.push(format!("Files: {}", findings.files.join(", ")));
    }
    if !findings.gotchas.is_empty() {
        lines.push(format!("Gotchas: {}", findings.gotchas.join("; ")));
    }
    if let Some(opening) = messages.iter().find(|m| m.role == Role::User) {
        lines.push(format!("Opened with: {}", excerpt(&opening.content)));
    }
    if let Some(last) = messages.last() {
        lines.push(format!("Last {}: {}", last.role.as_str(), excerpt(&last.content)));
    }

    clip(&lines.join("\n"), max_chars)
}

fn excerpt(content: &str) -> String {
    let first_line = content.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    clip(first_line, EXCERPT_CHARS)
}
