//! Shared fixture for store-backed tests

use tempfile::TempDir;

use crate::config::DatabaseConfig;
use crate::model::{ConversationMessage, Role};
use crate::store::ContextStore;

/// Temp database seeded with one project ("webshop") and one open ticket
pub struct Fixture {
    pub store: ContextStore,
    pub project_id: i64,
    pub ticket_id: i64,
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: String::new(),
            pool_size: 4,
            busy_timeout_ms: 5_000,
        };
        let store = ContextStore::open(&dir.path().join("test.db"), &config).unwrap();
        let project_id = store
            .create_project("webshop", Some("/var/www/webshop"), Some("/srv/webshop"))
            .unwrap();
        let ticket_id = store.create_ticket(project_id, "TKT-001").unwrap();

        Self {
            store,
            project_id,
            ticket_id,
            _dir: dir,
        }
    }

    pub fn say(&self, role: Role, content: &str) -> ConversationMessage {
        self.store
            .append_message(self.ticket_id, role, content)
            .unwrap()
    }

    /// Message whose estimate is exactly `tokens`
    pub fn say_tokens(&self, tokens: usize) -> ConversationMessage {
        self.say(Role::User, &"w".repeat(tokens * crate::tokens::CHARS_PER_TOKEN))
    }
}
