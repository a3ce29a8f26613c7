//! SQLite schema definition
//!
//! Tables hold the collaborator records (preferences, projects, maps,
//! knowledge, tickets, messages) plus the extractions this crate writes.
//! The three `v_*` views are read by operational tooling and the batch
//! extraction driver.

/// Unsummarized token volume above which a ticket is listed for extraction
pub const EXTRACTION_TOKEN_THRESHOLD: i64 = 4000;

/// Unsummarized message count above which a ticket is listed for extraction
pub const EXTRACTION_MESSAGE_THRESHOLD: i64 = 20;

pub const SCHEMA: &str = r#"
-- ============================================
-- USERS & PROJECTS
-- ============================================

CREATE TABLE IF NOT EXISTS user_preferences (
    user_id TEXT PRIMARY KEY,
    language TEXT,                         -- preferred programming language
    skill_level TEXT,                      -- 'beginner', 'intermediate', 'senior', ...
    style_notes TEXT,                      -- free-form instructions
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    web_path TEXT,
    app_path TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

-- One structural snapshot per project, regenerated on demand
CREATE TABLE IF NOT EXISTS project_maps (
    project_id INTEGER PRIMARY KEY,
    file_count INTEGER,
    primary_language TEXT,
    tech_stack TEXT,                       -- JSON array
    structure_summary TEXT,
    generated_at DATETIME,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS project_knowledge (
    project_id INTEGER PRIMARY KEY,
    coding_patterns TEXT,                  -- JSON array or free text
    known_gotchas TEXT,                    -- JSON array or free text
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
);

-- ============================================
-- TICKETS & CONVERSATIONS
-- ============================================

CREATE TABLE IF NOT EXISTS tickets (
    id INTEGER PRIMARY KEY,
    ticket_number TEXT NOT NULL UNIQUE,
    project_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',   -- 'open', 'in_progress', 'closed'
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
);

-- id order is conversation order
CREATE TABLE IF NOT EXISTS conversation_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id INTEGER NOT NULL,
    role TEXT NOT NULL,                    -- 'user', 'assistant', 'system'
    content TEXT NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    is_summarized BOOLEAN NOT NULL DEFAULT FALSE,
    extraction_id INTEGER,                 -- set together with is_summarized
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY(ticket_id) REFERENCES tickets(id) ON DELETE CASCADE,
    FOREIGN KEY(extraction_id) REFERENCES ticket_extractions(id)
);

-- Immutable once written
CREATE TABLE IF NOT EXISTS ticket_extractions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_id INTEGER NOT NULL,
    tokens_before INTEGER NOT NULL,
    tokens_after INTEGER NOT NULL,
    messages_summarized INTEGER NOT NULL,
    decisions TEXT NOT NULL,               -- JSON array
    files_modified TEXT NOT NULL,          -- JSON array
    known_gotchas TEXT NOT NULL,           -- JSON array
    summary TEXT NOT NULL,
    first_message_id INTEGER NOT NULL,
    last_message_id INTEGER NOT NULL,
    created_at DATETIME NOT NULL,
    CHECK (tokens_after <= tokens_before),
    FOREIGN KEY(ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_messages_ticket ON conversation_messages(ticket_id, is_summarized, id);
CREATE INDEX IF NOT EXISTS idx_extractions_ticket ON ticket_extractions(ticket_id, id DESC);
CREATE INDEX IF NOT EXISTS idx_tickets_project ON tickets(project_id);
CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);

-- ============================================
-- VIEWS
-- ============================================

CREATE VIEW IF NOT EXISTS v_ticket_context AS
SELECT t.id AS ticket_id,
       t.ticket_number,
       t.status,
       p.id AS project_id,
       p.name AS project_name,
       p.web_path,
       p.app_path,
       (SELECT COUNT(*) FROM conversation_messages m WHERE m.ticket_id = t.id) AS message_count,
       (SELECT COUNT(*) FROM conversation_messages m
         WHERE m.ticket_id = t.id AND m.is_summarized = FALSE) AS unsummarized_count,
       (SELECT COUNT(*) FROM ticket_extractions e WHERE e.ticket_id = t.id) AS extraction_count
FROM tickets t
JOIN projects p ON t.project_id = p.id;

CREATE VIEW IF NOT EXISTS v_tickets_needing_extraction AS
SELECT t.id AS ticket_id,
       t.ticket_number,
       COUNT(m.id) AS unsummarized_count,
       COALESCE(SUM(m.token_count), 0) AS unsummarized_tokens
FROM tickets t
JOIN conversation_messages m ON m.ticket_id = t.id AND m.is_summarized = FALSE
WHERE t.status != 'closed'
GROUP BY t.id, t.ticket_number
HAVING COUNT(m.id) > 20 OR SUM(m.token_count) > 4000;

CREATE VIEW IF NOT EXISTS v_projects_needing_map AS
SELECT p.id AS project_id,
       p.name,
       pm.project_id IS NOT NULL AS has_map
FROM projects p
LEFT JOIN project_maps pm ON pm.project_id = p.id
WHERE pm.project_id IS NULL
   OR pm.generated_at IS NULL
   OR julianday(pm.generated_at) < julianday(p.updated_at);
"#;
