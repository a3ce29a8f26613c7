//! Typed records read from and written to the store

use chrono::{DateTime, Utc};

/// Who authored a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Per-user personalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPreferences {
    pub user_id: String,
    pub language: Option<String>,
    pub skill_level: Option<String>,
    pub style_notes: Option<String>,
}

impl UserPreferences {
    /// True when no attribute carries any text
    pub fn is_blank(&self) -> bool {
        [&self.language, &self.skill_level, &self.style_notes]
            .iter()
            .all(|v| v.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub web_path: Option<String>,
    pub app_path: Option<String>,
}

/// Structural snapshot of a project, regenerated externally
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectMap {
    pub project_id: i64,
    pub file_count: Option<i64>,
    pub primary_language: Option<String>,
    pub tech_stack: Vec<String>,
    pub structure_summary: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Accumulated facts about a project
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectKnowledge {
    pub project_id: i64,
    pub coding_patterns: Vec<String>,
    pub known_gotchas: Vec<String>,
}

impl ProjectKnowledge {
    pub fn is_empty(&self) -> bool {
        self.coding_patterns.is_empty() && self.known_gotchas.is_empty()
    }
}

/// A ticket joined with its owning project
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub id: i64,
    pub ticket_number: String,
    pub status: String,
    pub project_id: i64,
    pub project_name: String,
    pub web_path: Option<String>,
    pub app_path: Option<String>,
}

impl Ticket {
    pub fn is_closed(&self) -> bool {
        self.status.eq_ignore_ascii_case("closed")
    }
}

/// One turn of a ticket conversation
///
/// `is_summary` marks the synthetic entry the history selector builds from
/// the latest extraction. It never exists in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub id: i64,
    pub ticket_id: i64,
    pub role: Role,
    pub content: String,
    pub token_count: usize,
    pub is_summarized: bool,
    pub is_summary: bool,
}

impl ConversationMessage {
    /// Stand-in for everything the extraction compressed
    pub fn summary_of(extraction: &Extraction) -> Self {
        Self {
            id: 0,
            ticket_id: extraction.ticket_id,
            role: Role::System,
            content: extraction.summary.clone(),
            token_count: extraction.tokens_after,
            is_summarized: false,
            is_summary: true,
        }
    }
}

/// Compressed record standing in for a summarized batch
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub id: i64,
    pub ticket_id: i64,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub messages_summarized: usize,
    pub decisions: Vec<String>,
    pub files_modified: Vec<String>,
    pub known_gotchas: Vec<String>,
    pub summary: String,
    pub first_message_id: i64,
    pub last_message_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Extraction content before it has been persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewExtraction {
    pub ticket_id: i64,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub decisions: Vec<String>,
    pub files_modified: Vec<String>,
    pub known_gotchas: Vec<String>,
    pub summary: String,
}

// ============================================
// VIEW ROWS
// ============================================

#[derive(Debug, Clone, PartialEq)]
pub struct TicketContextRow {
    pub ticket_id: i64,
    pub ticket_number: String,
    pub status: String,
    pub project_name: String,
    pub message_count: i64,
    pub unsummarized_count: i64,
    pub extraction_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingExtractionRow {
    pub ticket_id: i64,
    pub ticket_number: String,
    pub unsummarized_count: i64,
    pub unsummarized_tokens: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectNeedingMapRow {
    pub project_id: i64,
    pub name: String,
    pub has_map: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("Assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("tool"), None);
        assert_eq!(Role::User.as_str(), "user");
    }

    #[test]
    fn blank_preferences() {
        let prefs = UserPreferences {
            user_id: "fotis".into(),
            language: Some("  ".into()),
            ..Default::default()
        };
        assert!(prefs.is_blank());

        let prefs = UserPreferences {
            skill_level: Some("senior".into()),
            ..prefs
        };
        assert!(!prefs.is_blank());
    }
}
