//! Smart context core
//!
//! [`SmartContext`] wires the accessors, history selector, extraction engine
//! and assembler around one injected [`ContextStore`]. The components talk to
//! each other only through what the store has committed.

mod assembler;
mod extraction;
mod history;
mod records;

pub use assembler::{
    ContextAssembler, FullContext, PREVIOUS_CONTEXT_HEADER, PROJECT_KNOWLEDGE_HEADER,
    PROJECT_STRUCTURE_HEADER, USER_PREFERENCES_HEADER,
};
pub use extraction::{
    DecisionScanner, ExtractionEngine, ExtractionOutcome, FilePathScanner, Findings,
    GotchaScanner, Scanner, ScannerSet, TicketOutcome,
};
pub use history::{history_tokens, select_within_budget, HistorySelector};
pub use records::Accessors;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::model::{
    ConversationMessage, Extraction, ProjectKnowledge, ProjectMap, Ticket, UserPreferences,
};
use crate::store::ContextStore;
use crate::tokens::{self, truncate_chars};

/// Clip to `max_chars` characters, marking the cut with "..."
pub(crate) fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars < 3 {
        return truncate_chars(text, max_chars).to_string();
    }
    let mut clipped = truncate_chars(text, max_chars - 3).trim_end().to_string();
    clipped.push_str("...");
    clipped
}

pub struct SmartContext {
    store: ContextStore,
    accessors: Arc<Accessors>,
    history: HistorySelector,
    extraction: ExtractionEngine,
    assembler: ContextAssembler,
    history_budget: usize,
    total_budget: usize,
}

impl SmartContext {
    pub fn new(store: ContextStore, config: &Config) -> Self {
        let accessors = Arc::new(Accessors::new(store.clone(), &config.context));
        let history = HistorySelector::new(store.clone());
        let extraction = ExtractionEngine::new(store.clone(), &config.extraction);
        let assembler = ContextAssembler::new(
            store.clone(),
            Arc::clone(&accessors),
            config.context.section_max_chars,
        );

        Self {
            store,
            accessors,
            history,
            extraction,
            assembler,
            history_budget: config.context.history_budget,
            total_budget: config.context.total_budget,
        }
    }

    /// Swap the extraction heuristics
    pub fn with_scanners(mut self, scanners: ScannerSet) -> Self {
        self.extraction = self.extraction.with_scanners(scanners);
        self
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        tokens::count_tokens(text)
    }

    // ============================================
    // ACCESSORS
    // ============================================

    pub fn get_user_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        self.accessors.get_user_preferences(user_id)
    }

    pub fn build_user_context(&self, user_id: &str) -> String {
        self.accessors.build_user_context(user_id)
    }

    pub fn get_project_map(&self, project_id: i64) -> Result<Option<ProjectMap>> {
        self.accessors.get_project_map(project_id)
    }

    pub fn get_project_knowledge(&self, project_id: i64) -> Result<Option<ProjectKnowledge>> {
        self.accessors.get_project_knowledge(project_id)
    }

    pub fn set_user_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        self.store.upsert_user_preferences(prefs)?;
        self.accessors.invalidate_user(&prefs.user_id);
        Ok(())
    }

    pub fn set_project_map(&self, map: &ProjectMap) -> Result<()> {
        self.store.upsert_project_map(map)?;
        self.accessors.invalidate_project(map.project_id);
        Ok(())
    }

    pub fn set_project_knowledge(&self, knowledge: &ProjectKnowledge) -> Result<()> {
        self.store.upsert_project_knowledge(knowledge)?;
        self.accessors.invalidate_project(knowledge.project_id);
        Ok(())
    }

    /// Append a gotcha to the project's knowledge unless it is already known
    pub fn add_project_gotcha(&self, project_id: i64, gotcha: &str) -> Result<bool> {
        let mut knowledge = self
            .store
            .get_project_knowledge(project_id)?
            .unwrap_or_else(|| ProjectKnowledge {
                project_id,
                ..Default::default()
            });

        let gotcha = gotcha.trim();
        if gotcha.is_empty()
            || knowledge
                .known_gotchas
                .iter()
                .any(|g| g.eq_ignore_ascii_case(gotcha))
        {
            return Ok(false);
        }

        knowledge.known_gotchas.push(gotcha.to_string());
        self.set_project_knowledge(&knowledge)?;
        Ok(true)
    }

    // ============================================
    // HISTORY & EXTRACTION
    // ============================================

    pub fn get_smart_history(
        &self,
        ticket_id: i64,
        token_budget: usize,
    ) -> Result<Vec<ConversationMessage>> {
        self.history.get_smart_history(ticket_id, token_budget)
    }

    /// Smart history with the configured history budget
    pub fn default_history(&self, ticket_id: i64) -> Result<Vec<ConversationMessage>> {
        self.get_smart_history(ticket_id, self.history_budget)
    }

    pub fn create_extraction(
        &self,
        ticket_id: i64,
        messages: &[ConversationMessage],
    ) -> Result<Extraction> {
        self.extraction.create_extraction(ticket_id, messages)
    }

    pub fn next_batch(&self, ticket_id: i64) -> Result<Vec<ConversationMessage>> {
        self.extraction.next_batch(ticket_id)
    }

    pub fn extract_pending(&self) -> Result<Vec<TicketOutcome>> {
        self.extraction.extract_pending()
    }

    // ============================================
    // ASSEMBLY
    // ============================================

    pub fn build_full_context(
        &self,
        ticket: &Ticket,
        user_id: &str,
        token_budget: usize,
    ) -> Result<FullContext> {
        self.assembler.build_full_context(ticket, user_id, token_budget)
    }

    /// Full context with the configured total budget
    pub fn default_context(&self, ticket: &Ticket, user_id: &str) -> Result<FullContext> {
        self.build_full_context(ticket, user_id, self.total_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::testutil::Fixture;

    fn smart(fx: &Fixture) -> SmartContext {
        SmartContext::new(fx.store.clone(), &Config::default())
    }

    #[test]
    fn clip_marks_the_cut() {
        assert_eq!(clip("abcdef", 10), "abcdef");
        assert_eq!(clip("abcdefghij", 6), "abc...");
        assert_eq!(clip("abcdef", 2), "ab");
        assert!(clip(&"é".repeat(50), 20).chars().count() <= 20);
    }

    #[test]
    fn writes_through_facade_invalidate_cache() {
        let fx = Fixture::new();
        let ctx = smart(&fx);
        assert!(ctx.get_user_preferences("fotis").unwrap().is_none());

        ctx.set_user_preferences(&UserPreferences {
            user_id: "fotis".into(),
            language: Some("Go".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(ctx.build_user_context("fotis").contains("Preferred language: Go"));
    }

    #[test]
    fn add_gotcha_skips_duplicates() {
        let fx = Fixture::new();
        let ctx = smart(&fx);
        assert!(ctx.add_project_gotcha(fx.project_id, "Cron runs in UTC").unwrap());
        assert!(!ctx.add_project_gotcha(fx.project_id, "cron runs in utc").unwrap());
        assert!(!ctx.add_project_gotcha(fx.project_id, "   ").unwrap());

        let knowledge = ctx.get_project_knowledge(fx.project_id).unwrap().unwrap();
        assert_eq!(knowledge.known_gotchas, vec!["Cron runs in UTC".to_string()]);
    }

    #[test]
    fn extraction_then_history_then_context() {
        let fx = Fixture::new();
        let ctx = smart(&fx);
        let batch = vec![
            fx.say(Role::User, "Orders page is slow, please check src/app.py and the queries there."),
            fx.say(Role::Assistant, "Each order triggers its own query. After profiling, we decided to use Postgres with a join."),
            fx.say(Role::User, "Sounds good, go ahead with the migration on the staging box."),
            fx.say(Role::Assistant, "Done. Watch out: the staging box has an older psql client installed."),
            fx.say(Role::User, "Noted, I will upgrade it tomorrow morning before the release."),
        ];
        let live = fx.say(Role::User, "Next issue: the invoice PDF has the wrong logo.");

        let extraction = ctx.create_extraction(fx.ticket_id, &batch).unwrap();
        assert!(extraction.decisions.iter().any(|d| d.contains("Postgres")));
        assert!(extraction.files_modified.contains(&"src/app.py".to_string()));

        let history = ctx.default_history(fx.ticket_id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_summary);
        assert_eq!(history[1].id, live.id);
        assert!(history.iter().all(|m| !batch.iter().any(|b| b.id == m.id)));

        let ticket = fx.store.get_ticket(fx.ticket_id).unwrap().unwrap();
        let full = ctx.default_context(&ticket, "fotis").unwrap();
        assert!(full.system_context.starts_with(PREVIOUS_CONTEXT_HEADER));
        assert_eq!(full.history, history);
    }
}
