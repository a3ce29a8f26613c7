//! Context assembly
//!
//! Composes the system context from four optional sections, always in this
//! order:
//!
//! 1. user preferences
//! 2. project structure (map)
//! 3. project knowledge
//! 4. previous context (latest extraction summary)
//!
//! Each present section starts with a fixed header line so consumers can
//! detect it by substring. History is selected with whatever budget the
//! system context leaves over. Assembly performs no writes.

use std::sync::Arc;
use tracing::debug;

use super::clip;
use super::history::{history_tokens, select_within_budget};
use super::records::Accessors;
use crate::error::Result;
use crate::model::{ConversationMessage, Extraction, ProjectKnowledge, ProjectMap, Ticket};
use crate::store::ContextStore;
use crate::tokens::{count_tokens, max_chars_for};

pub const USER_PREFERENCES_HEADER: &str = "=== USER PREFERENCES ===";
pub const PROJECT_STRUCTURE_HEADER: &str = "=== PROJECT STRUCTURE ===";
pub const PROJECT_KNOWLEDGE_HEADER: &str = "=== PROJECT KNOWLEDGE ===";
pub const PREVIOUS_CONTEXT_HEADER: &str = "=== PREVIOUS CONTEXT ===";

const SECTION_SEPARATOR: &str = "\n\n";

/// A section clipped to fewer body chars than this is dropped instead
const MIN_SECTION_BODY_CHARS: usize = 40;

/// Assembled prompt material for one ticket turn
#[derive(Debug, Clone, PartialEq)]
pub struct FullContext {
    pub system_context: String,
    pub history: Vec<ConversationMessage>,
    pub system_tokens: usize,
    pub history_tokens: usize,
}

pub struct ContextAssembler {
    store: ContextStore,
    accessors: Arc<Accessors>,
    section_max_chars: usize,
}

impl ContextAssembler {
    pub fn new(store: ContextStore, accessors: Arc<Accessors>, section_max_chars: usize) -> Self {
        Self {
            store,
            accessors,
            section_max_chars,
        }
    }

    /// Build the system context and budgeted history for `ticket`
    ///
    /// Missing preferences, map, knowledge or extraction only drop their
    /// section. Store failures are returned, except for preferences, which
    /// degrade to an empty block.
    ///
    /// The two parts together stay within `token_budget`. The system context
    /// gives way to history: sections are cut from the bottom up. The only
    /// overrun is history the selector cannot shrink, a single message or
    /// the summary entry that is larger than the whole budget.
    pub fn build_full_context(
        &self,
        ticket: &Ticket,
        user_id: &str,
        token_budget: usize,
    ) -> Result<FullContext> {
        let (messages, latest) = self.store.history_snapshot(ticket.id)?;

        let mut sections = Vec::with_capacity(4);

        let user_block = self.accessors.build_user_context(user_id);
        if !user_block.is_empty() {
            sections.push(user_block);
        }

        if let Some(map) = self.accessors.get_project_map(ticket.project_id)? {
            sections.push(clip(&render_map(ticket, &map), self.section_max_chars));
        }

        if let Some(knowledge) = self.accessors.get_project_knowledge(ticket.project_id)? {
            if !knowledge.is_empty() {
                sections.push(clip(&render_knowledge(&knowledge), self.section_max_chars));
            }
        }

        if let Some(extraction) = &latest {
            sections.push(clip(&render_previous(extraction), self.section_max_chars));
        }

        let rendered = sections.len();
        let mut sections = fit_sections(sections, token_budget);
        let mut system_context = sections.join(SECTION_SEPARATOR);
        let mut system_tokens = count_tokens(&system_context);

        let history_budget = token_budget.saturating_sub(system_tokens);
        let summary = latest.as_ref().map(ConversationMessage::summary_of);
        let history = select_within_budget(summary, messages, history_budget);
        let history_tokens = history_tokens(&history);

        if system_tokens + history_tokens > token_budget {
            sections = fit_sections(sections, token_budget.saturating_sub(history_tokens));
            system_context = sections.join(SECTION_SEPARATOR);
            system_tokens = count_tokens(&system_context);
        }

        debug!(
            ticket_id = ticket.id,
            sections = sections.len(),
            trimmed = rendered - sections.len(),
            system_tokens,
            history_budget,
            history_tokens,
            "context assembled"
        );

        Ok(FullContext {
            system_context,
            history,
            system_tokens,
            history_tokens,
        })
    }
}

/// Shrink the joined sections to `max_tokens`, cutting the last section first
fn fit_sections(mut sections: Vec<String>, max_tokens: usize) -> Vec<String> {
    let max_chars = max_chars_for(max_tokens);
    loop {
        let total = joined_chars(&sections);
        if total <= max_chars {
            return sections;
        }
        let Some(last) = sections.pop() else {
            return sections;
        };

        let keep = last.chars().count().saturating_sub(total - max_chars);
        let header_chars = last.lines().next().map_or(0, |h| h.chars().count());
        if keep >= header_chars + MIN_SECTION_BODY_CHARS {
            sections.push(clip(&last, keep));
        }
    }
}

fn joined_chars(sections: &[String]) -> usize {
    let body: usize = sections.iter().map(|s| s.chars().count()).sum();
    body + SECTION_SEPARATOR.len() * sections.len().saturating_sub(1)
}

fn render_map(ticket: &Ticket, map: &ProjectMap) -> String {
    let mut lines = vec![
        PROJECT_STRUCTURE_HEADER.to_string(),
        format!("Project: {}", ticket.project_name),
    ];
    if let Some(path) = &ticket.web_path {
        lines.push(format!("Web path: {path}"));
    }
    if let Some(path) = &ticket.app_path {
        lines.push(format!("App path: {path}"));
    }
    if let Some(count) = map.file_count {
        lines.push(format!("Files: {count}"));
    }
    if let Some(language) = &map.primary_language {
        lines.push(format!("Primary language: {language}"));
    }
    if !map.tech_stack.is_empty() {
        lines.push(format!("Tech stack: {}", map.tech_stack.join(", ")));
    }
    if let Some(summary) = map.structure_summary.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push("Structure:".to_string());
        lines.push(summary.trim().to_string());
    }
    lines.join("\n")
}

fn render_knowledge(knowledge: &ProjectKnowledge) -> String {
    let mut lines = vec![PROJECT_KNOWLEDGE_HEADER.to_string()];
    if !knowledge.coding_patterns.is_empty() {
        lines.push("Coding patterns:".to_string());
        lines.extend(knowledge.coding_patterns.iter().map(|p| format!("- {p}")));
    }
    if !knowledge.known_gotchas.is_empty() {
        lines.push("Known gotchas:".to_string());
        lines.extend(knowledge.known_gotchas.iter().map(|g| format!("- {g}")));
    }
    lines.join("\n")
}

fn render_previous(extraction: &Extraction) -> String {
    format!("{PREVIOUS_CONTEXT_HEADER}\n{}", extraction.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextConfig, ExtractionConfig};
    use crate::context::ExtractionEngine;
    use crate::model::{Role, UserPreferences};
    use crate::testutil::Fixture;

    fn assembler(fx: &Fixture) -> ContextAssembler {
        let config = ContextConfig::default();
        let accessors = Arc::new(Accessors::new(fx.store.clone(), &config));
        ContextAssembler::new(fx.store.clone(), accessors, config.section_max_chars)
    }

    fn ticket(fx: &Fixture) -> Ticket {
        fx.store.get_ticket(fx.ticket_id).unwrap().unwrap()
    }

    fn seed_everything(fx: &Fixture) {
        fx.store
            .upsert_user_preferences(&UserPreferences {
                user_id: "fotis".into(),
                language: Some("PHP".into()),
                skill_level: Some("intermediate".into()),
                style_notes: None,
            })
            .unwrap();
        fx.store
            .upsert_project_map(&ProjectMap {
                project_id: fx.project_id,
                file_count: Some(120),
                primary_language: Some("PHP".into()),
                tech_stack: vec!["Laravel".into(), "Vue".into()],
                structure_summary: Some("app/ resources/ routes/".into()),
                generated_at: None,
            })
            .unwrap();
        fx.store
            .upsert_project_knowledge(&ProjectKnowledge {
                project_id: fx.project_id,
                coding_patterns: vec!["Controllers stay thin".into()],
                known_gotchas: vec!["Queue workers cache config".into()],
            })
            .unwrap();
    }

    #[test]
    fn empty_sources_give_empty_context() {
        let fx = Fixture::new();
        let ctx = assembler(&fx)
            .build_full_context(&ticket(&fx), "nobody", 1_000)
            .unwrap();
        assert_eq!(ctx.system_context, "");
        assert!(ctx.history.is_empty());
        assert_eq!(ctx.system_tokens, 0);
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let fx = Fixture::new();
        seed_everything(&fx);
        let batch: Vec<_> = (0..4)
            .map(|i| fx.say(Role::User, &format!("we decided to ship step {i}")))
            .collect();
        ExtractionEngine::new(fx.store.clone(), &ExtractionConfig::default())
            .create_extraction(fx.ticket_id, &batch)
            .unwrap();

        let ctx = assembler(&fx)
            .build_full_context(&ticket(&fx), "fotis", 8_000)
            .unwrap();
        let positions: Vec<_> = [
            USER_PREFERENCES_HEADER,
            PROJECT_STRUCTURE_HEADER,
            PROJECT_KNOWLEDGE_HEADER,
            PREVIOUS_CONTEXT_HEADER,
        ]
        .iter()
        .map(|h| ctx.system_context.find(h).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        assert!(ctx.system_context.contains("Tech stack: Laravel, Vue"));
        assert!(ctx.system_context.contains("- Queue workers cache config"));
        assert!(ctx.system_context.contains("Web path: /var/www/webshop"));

        // summary reaches both audiences
        assert_eq!(ctx.history.len(), 1);
        assert!(ctx.history[0].is_summary);
    }

    #[test]
    fn missing_preferences_omit_only_that_section() {
        let fx = Fixture::new();
        seed_everything(&fx);
        let ctx = assembler(&fx)
            .build_full_context(&ticket(&fx), "someone-else", 8_000)
            .unwrap();
        assert!(!ctx.system_context.contains(USER_PREFERENCES_HEADER));
        assert!(ctx.system_context.starts_with(PROJECT_STRUCTURE_HEADER));
        assert!(ctx.system_context.contains(PROJECT_KNOWLEDGE_HEADER));
        assert!(!ctx.system_context.contains(PREVIOUS_CONTEXT_HEADER));
    }

    #[test]
    fn history_gets_what_the_system_context_leaves() {
        let fx = Fixture::new();
        seed_everything(&fx);
        for _ in 0..10 {
            fx.say_tokens(50);
        }

        let asm = assembler(&fx);
        let ctx = asm.build_full_context(&ticket(&fx), "fotis", 300).unwrap();
        assert!(ctx.system_tokens > 0);
        assert!(ctx.system_tokens + ctx.history_tokens <= 300);
        assert_eq!(ctx.history.len(), (300 - ctx.system_tokens) / 50);
    }

    #[test]
    fn assembly_is_idempotent() {
        let fx = Fixture::new();
        seed_everything(&fx);
        fx.say(Role::User, "Why does the cart lose items?");
        fx.say(Role::Assistant, "Sessions expire after 5 minutes in config/session.php.");

        let asm = assembler(&fx);
        let first = asm.build_full_context(&ticket(&fx), "fotis", 2_000).unwrap();
        let second = asm.build_full_context(&ticket(&fx), "fotis", 2_000).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_sections_yield_to_history() {
        let fx = Fixture::new();
        fx.store
            .upsert_project_map(&ProjectMap {
                project_id: fx.project_id,
                structure_summary: Some("src/ ".repeat(400)),
                ..Default::default()
            })
            .unwrap();
        fx.store
            .upsert_project_knowledge(&ProjectKnowledge {
                project_id: fx.project_id,
                coding_patterns: vec!["Keep controllers thin and push logic into services".into(); 20],
                known_gotchas: vec![],
            })
            .unwrap();
        let live = fx.say(Role::User, "The export button does nothing on Safari.");

        let asm = assembler(&fx);
        for budget in [0usize, 5, 40, 100, 250, 1_000] {
            let ctx = asm.build_full_context(&ticket(&fx), "nobody", budget).unwrap();
            assert_eq!(ctx.history.last().map(|m| m.id), Some(live.id));
            if live.token_count <= budget {
                assert!(
                    ctx.system_tokens + ctx.history_tokens <= budget,
                    "budget {budget}: {} + {}",
                    ctx.system_tokens,
                    ctx.history_tokens
                );
            } else {
                assert_eq!(ctx.system_context, "");
            }
            assert_eq!(ctx.system_tokens, count_tokens(&ctx.system_context));
        }

        // knowledge is cut before the map
        let ctx = asm.build_full_context(&ticket(&fx), "nobody", 100).unwrap();
        assert!(ctx.system_context.starts_with(PROJECT_STRUCTURE_HEADER));
        assert!(!ctx.system_context.contains(PROJECT_KNOWLEDGE_HEADER));
    }

    #[test]
    fn previous_context_matches_history_summary() {
        let fx = Fixture::new();
        let engine = ExtractionEngine::new(fx.store.clone(), &ExtractionConfig::default());
        for round in 0..2 {
            let batch: Vec<_> = (0..3)
                .map(|i| fx.say(Role::User, &format!("round {round}: we agreed on option {i}")))
                .collect();
            engine.create_extraction(fx.ticket_id, &batch).unwrap();
        }

        let ctx = assembler(&fx)
            .build_full_context(&ticket(&fx), "nobody", 8_000)
            .unwrap();
        let latest = fx.store.latest_extraction(fx.ticket_id).unwrap().unwrap();
        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.history[0].content, latest.summary);
        assert_eq!(
            ctx.system_context,
            format!("{PREVIOUS_CONTEXT_HEADER}\n{}", latest.summary)
        );
    }

    #[test]
    fn fitting_drops_sections_too_small_to_keep() {
        let sections = vec![
            format!("{USER_PREFERENCES_HEADER}\nSkill level: senior"),
            format!("{PROJECT_KNOWLEDGE_HEADER}\n{}", "- gotcha\n".repeat(50)),
        ];
        let first = sections[0].clone();

        let fitted = fit_sections(sections.clone(), 20);
        assert_eq!(fitted, vec![first]);

        let fitted = fit_sections(sections.clone(), 60);
        assert_eq!(fitted.len(), 2);
        assert!(joined_chars(&fitted) <= max_chars_for(60));

        assert!(fit_sections(sections, 0).is_empty());
    }

    #[test]
    fn empty_knowledge_is_omitted() {
        let fx = Fixture::new();
        fx.store
            .upsert_project_knowledge(&ProjectKnowledge {
                project_id: fx.project_id,
                ..Default::default()
            })
            .unwrap();
        let ctx = assembler(&fx)
            .build_full_context(&ticket(&fx), "nobody", 1_000)
            .unwrap();
        assert_eq!(ctx.system_context, "");
    }
}
