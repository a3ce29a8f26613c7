//! Relational store adapter over a pooled SQLite database
//!
//! Every public method checks one connection out of the pool, runs a single
//! query (or one transaction) and hands the connection back when it drops,
//! on success and on error alike. Components never hold a connection across
//! calls.

mod schema;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{ContextError, Result};
use crate::model::{
    ConversationMessage, Extraction, NewExtraction, PendingExtractionRow, Project,
    ProjectKnowledge, ProjectMap, ProjectNeedingMapRow, Role, Ticket, TicketContextRow,
    UserPreferences,
};
use crate::tokens::count_tokens;

pub use schema::{EXTRACTION_MESSAGE_THRESHOLD, EXTRACTION_TOKEN_THRESHOLD, SCHEMA};

pub type ConnectionPool = Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pragmas applied to every connection the pool hands out
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA foreign_keys = ON;\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
    }
}

/// Injected handle to the external store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct ContextStore {
    pool: ConnectionPool,
}

impl ContextStore {
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ContextError::StoreUnavailable(format!("create {}: {e}", parent.display()))
            })?;
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms.max(1000))))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(manager)?;

        let store = Self { pool };
        store.init_schema()?;
        info!(path = %path.display(), pool_size = config.pool_size, "context store opened");
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ============================================
    // USER PREFERENCES
    // ============================================

    pub fn get_user_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let conn = self.conn()?;
        let prefs = conn
            .query_row(
                "SELECT user_id, language, skill_level, style_notes
                 FROM user_preferences WHERE user_id = ?",
                params![user_id],
                |row| {
                    Ok(UserPreferences {
                        user_id: row.get(0)?,
                        language: row.get(1)?,
                        skill_level: row.get(2)?,
                        style_notes: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(prefs)
    }

    pub fn upsert_user_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO user_preferences (user_id, language, skill_level, style_notes, updated_at)
             VALUES (?, ?, ?, ?, datetime('now'))
             ON CONFLICT(user_id) DO UPDATE SET
                 language = excluded.language,
                 skill_level = excluded.skill_level,
                 style_notes = excluded.style_notes,
                 updated_at = excluded.updated_at",
            params![prefs.user_id, prefs.language, prefs.skill_level, prefs.style_notes],
        )?;
        Ok(())
    }

    // ============================================
    // PROJECTS, MAPS & KNOWLEDGE
    // ============================================

    pub fn create_project(
        &self,
        name: &str,
        web_path: Option<&str>,
        app_path: Option<&str>,
    ) -> Result<i64> {
        let id = self.conn()?.query_row(
            "INSERT INTO projects (name, web_path, app_path, created_at, updated_at)
             VALUES (?, ?, ?, datetime('now'), datetime('now'))
             RETURNING id",
            params![name, web_path, app_path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_project(&self, project_id: i64) -> Result<Option<Project>> {
        let conn = self.conn()?;
        let project = conn
            .query_row(
                "SELECT id, name, web_path, app_path FROM projects WHERE id = ?",
                params![project_id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        web_path: row.get(2)?,
                        app_path: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    /// Mark the project as changed so its map counts as stale
    pub fn touch_project(&self, project_id: i64) -> Result<()> {
        self.conn()?.execute(
            "UPDATE projects SET updated_at = datetime('now') WHERE id = ?",
            params![project_id],
        )?;
        Ok(())
    }

    pub fn get_project_map(&self, project_id: i64) -> Result<Option<ProjectMap>> {
        let conn = self.conn()?;
        let map = conn
            .query_row(
                "SELECT project_id, file_count, primary_language, tech_stack,
                        structure_summary, generated_at
                 FROM project_maps WHERE project_id = ?",
                params![project_id],
                |row| {
                    Ok(ProjectMap {
                        project_id: row.get(0)?,
                        file_count: row.get(1)?,
                        primary_language: row.get(2)?,
                        tech_stack: decode_list(row.get(3)?),
                        structure_summary: row.get(4)?,
                        generated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(map)
    }

    pub fn upsert_project_map(&self, map: &ProjectMap) -> Result<()> {
        let tech_stack = serde_json::to_string(&map.tech_stack)?;
        let generated_at = map.generated_at.unwrap_or_else(Utc::now);
        self.conn()?.execute(
            "INSERT INTO project_maps
                 (project_id, file_count, primary_language, tech_stack, structure_summary, generated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(project_id) DO UPDATE SET
                 file_count = excluded.file_count,
                 primary_language = excluded.primary_language,
                 tech_stack = excluded.tech_stack,
                 structure_summary = excluded.structure_summary,
                 generated_at = excluded.generated_at",
            params![
                map.project_id,
                map.file_count,
                map.primary_language,
                tech_stack,
                map.structure_summary,
                generated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_project_knowledge(&self, project_id: i64) -> Result<Option<ProjectKnowledge>> {
        let conn = self.conn()?;
        let knowledge = conn
            .query_row(
                "SELECT project_id, coding_patterns, known_gotchas
                 FROM project_knowledge WHERE project_id = ?",
                params![project_id],
                |row| {
                    Ok(ProjectKnowledge {
                        project_id: row.get(0)?,
                        coding_patterns: decode_list(row.get(1)?),
                        known_gotchas: decode_list(row.get(2)?),
                    })
                },
            )
            .optional()?;
        Ok(knowledge)
    }

    pub fn upsert_project_knowledge(&self, knowledge: &ProjectKnowledge) -> Result<()> {
        let patterns = serde_json::to_string(&knowledge.coding_patterns)?;
        let gotchas = serde_json::to_string(&knowledge.known_gotchas)?;
        self.conn()?.execute(
            "INSERT INTO project_knowledge (project_id, coding_patterns, known_gotchas, updated_at)
             VALUES (?, ?, ?, datetime('now'))
             ON CONFLICT(project_id) DO UPDATE SET
                 coding_patterns = excluded.coding_patterns,
                 known_gotchas = excluded.known_gotchas,
                 updated_at = excluded.updated_at",
            params![knowledge.project_id, patterns, gotchas],
        )?;
        Ok(())
    }

    // ============================================
    // TICKETS
    // ============================================

    pub fn create_ticket(&self, project_id: i64, ticket_number: &str) -> Result<i64> {
        let id = self.conn()?.query_row(
            "INSERT INTO tickets (ticket_number, project_id, status, created_at)
             VALUES (?, ?, 'open', datetime('now'))
             RETURNING id",
            params![ticket_number, project_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn set_ticket_status(&self, ticket_id: i64, status: &str) -> Result<()> {
        self.conn()?.execute(
            "UPDATE tickets SET status = ? WHERE id = ?",
            params![status, ticket_id],
        )?;
        Ok(())
    }

    /// Ticket joined with its project's name and paths
    pub fn get_ticket(&self, ticket_id: i64) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let ticket = conn
            .query_row(
                &format!("{TICKET_SELECT} WHERE t.id = ?"),
                params![ticket_id],
                map_ticket,
            )
            .optional()?;
        Ok(ticket)
    }

    /// Look a ticket up by numeric id first, then by ticket number
    pub fn find_ticket(&self, query: &str) -> Result<Option<Ticket>> {
        let conn = self.conn()?;
        let ticket = conn
            .query_row(
                &format!(
                    "{TICKET_SELECT} WHERE t.ticket_number = ?1 OR CAST(t.id AS TEXT) = ?1
                     ORDER BY CASE WHEN CAST(t.id AS TEXT) = ?1 THEN 0 ELSE 1 END
                     LIMIT 1"
                ),
                params![query],
                map_ticket,
            )
            .optional()?;
        Ok(ticket)
    }

    // ============================================
    // MESSAGES
    // ============================================

    /// Append a turn; its token count is fixed at write time
    pub fn append_message(
        &self,
        ticket_id: i64,
        role: Role,
        content: &str,
    ) -> Result<ConversationMessage> {
        let token_count = count_tokens(content);
        let id = self.conn()?.query_row(
            "INSERT INTO conversation_messages (ticket_id, role, content, token_count, created_at)
             VALUES (?, ?, ?, ?, datetime('now'))
             RETURNING id",
            params![ticket_id, role.as_str(), content, token_count as i64],
            |row| row.get(0),
        )?;

        Ok(ConversationMessage {
            id,
            ticket_id,
            role,
            content: content.to_string(),
            token_count,
            is_summarized: false,
            is_summary: false,
        })
    }

    /// All messages of a ticket, summarized or not, in conversation order
    pub fn get_messages(&self, ticket_id: i64) -> Result<Vec<ConversationMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{MESSAGE_SELECT} WHERE ticket_id = ? ORDER BY id"))?;
        let rows = stmt.query_map(params![ticket_id], map_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Oldest unsummarized messages, at most `limit`
    pub fn unsummarized_messages(
        &self,
        ticket_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationMessage>> {
        let conn = self.conn()?;
        query_unsummarized(&conn, ticket_id, limit)
    }

    /// Unsummarized messages plus the latest extraction, read from one snapshot
    pub fn history_snapshot(
        &self,
        ticket_id: i64,
    ) -> Result<(Vec<ConversationMessage>, Option<Extraction>)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let messages = query_unsummarized(&tx, ticket_id, None)?;
        let latest = query_latest_extraction(&tx, ticket_id)?;
        tx.commit()?;
        Ok((messages, latest))
    }

    // ============================================
    // EXTRACTIONS
    // ============================================

    pub fn latest_extraction(&self, ticket_id: i64) -> Result<Option<Extraction>> {
        let conn = self.conn()?;
        query_latest_extraction(&conn, ticket_id)
    }

    pub fn list_extractions(&self, ticket_id: i64) -> Result<Vec<Extraction>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare(&format!("{EXTRACTION_SELECT} WHERE ticket_id = ? ORDER BY id"))?;
        let rows = stmt.query_map(params![ticket_id], map_extraction)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Persist the extraction and mark its batch summarized in one transaction
    ///
    /// The extraction row is written first, then each message is flipped with
    /// an update guarded by `is_summarized = FALSE`. If any guard fails the
    /// whole transaction rolls back: a message that another extraction already
    /// consumed yields [`ContextError::Conflict`], one that is not part of the
    /// ticket yields [`ContextError::InvariantViolation`].
    pub fn persist_extraction(
        &self,
        new: &NewExtraction,
        batch: &[ConversationMessage],
    ) -> Result<Extraction> {
        let first_message_id = batch.iter().map(|m| m.id).min();
        let last_message_id = batch.iter().map(|m| m.id).max();
        let (Some(first_message_id), Some(last_message_id)) = (first_message_id, last_message_id)
        else {
            return Err(ContextError::EmptyBatch {
                ticket_id: new.ticket_id,
            });
        };

        let decisions = serde_json::to_string(&new.decisions)?;
        let files_modified = serde_json::to_string(&new.files_modified)?;
        let known_gotchas = serde_json::to_string(&new.known_gotchas)?;
        let created_at = Utc::now();

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id: i64 = tx.query_row(
            "INSERT INTO ticket_extractions
                 (ticket_id, tokens_before, tokens_after, messages_summarized, decisions,
                  files_modified, known_gotchas, summary, first_message_id, last_message_id,
                  created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
            params![
                new.ticket_id,
                new.tokens_before as i64,
                new.tokens_after as i64,
                batch.len() as i64,
                decisions,
                files_modified,
                known_gotchas,
                new.summary,
                first_message_id,
                last_message_id,
                created_at,
            ],
            |row| row.get(0),
        )?;

        {
            let mut mark = tx.prepare(
                "UPDATE conversation_messages SET is_summarized = TRUE, extraction_id = ?1
                 WHERE id = ?2 AND ticket_id = ?3 AND is_summarized = FALSE",
            )?;
            for msg in batch {
                if mark.execute(params![id, msg.id, new.ticket_id])? == 1 {
                    continue;
                }

                let already_summarized: Option<bool> = tx
                    .query_row(
                        "SELECT is_summarized FROM conversation_messages
                         WHERE id = ? AND ticket_id = ?",
                        params![msg.id, new.ticket_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                return Err(match already_summarized {
                    Some(true) => {
                        warn!(ticket_id = new.ticket_id, message_id = msg.id, "extraction lost race");
                        ContextError::Conflict { message_id: msg.id }
                    }
                    _ => ContextError::InvariantViolation(format!(
                        "message {} does not belong to ticket {}",
                        msg.id, new.ticket_id
                    )),
                });
            }
        }

        tx.commit()?;
        debug!(extraction_id = id, ticket_id = new.ticket_id, "extraction committed");

        Ok(Extraction {
            id,
            ticket_id: new.ticket_id,
            tokens_before: new.tokens_before,
            tokens_after: new.tokens_after,
            messages_summarized: batch.len(),
            decisions: new.decisions.clone(),
            files_modified: new.files_modified.clone(),
            known_gotchas: new.known_gotchas.clone(),
            summary: new.summary.clone(),
            first_message_id,
            last_message_id,
            created_at,
        })
    }

    // ============================================
    // VIEWS
    // ============================================

    /// Row count of one of the monitoring views
    pub fn view_count(&self, view: View) -> Result<i64> {
        let count = self.conn()?.query_row(
            &format!("SELECT COUNT(*) FROM {}", view.as_str()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn ticket_contexts(&self) -> Result<Vec<TicketContextRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ticket_id, ticket_number, status, project_name,
                    message_count, unsummarized_count, extraction_count
             FROM v_ticket_context
             ORDER BY ticket_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TicketContextRow {
                ticket_id: row.get(0)?,
                ticket_number: row.get(1)?,
                status: row.get(2)?,
                project_name: row.get(3)?,
                message_count: row.get(4)?,
                unsummarized_count: row.get(5)?,
                extraction_count: row.get(6)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn tickets_needing_extraction(&self) -> Result<Vec<PendingExtractionRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ticket_id, ticket_number, unsummarized_count, unsummarized_tokens
             FROM v_tickets_needing_extraction
             ORDER BY unsummarized_tokens DESC, ticket_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingExtractionRow {
                ticket_id: row.get(0)?,
                ticket_number: row.get(1)?,
                unsummarized_count: row.get(2)?,
                unsummarized_tokens: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn projects_needing_map(&self) -> Result<Vec<ProjectNeedingMapRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT project_id, name, has_map FROM v_projects_needing_map ORDER BY project_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ProjectNeedingMapRow {
                project_id: row.get(0)?,
                name: row.get(1)?,
                has_map: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

/// Monitoring views consumed by operational tooling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    TicketContext,
    TicketsNeedingExtraction,
    ProjectsNeedingMap,
}

impl View {
    pub const ALL: [View; 3] = [
        View::TicketContext,
        View::TicketsNeedingExtraction,
        View::ProjectsNeedingMap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::TicketContext => "v_ticket_context",
            View::TicketsNeedingExtraction => "v_tickets_needing_extraction",
            View::ProjectsNeedingMap => "v_projects_needing_map",
        }
    }
}

// ============================================
// ROW MAPPING
// ============================================

const TICKET_SELECT: &str = r#"SELECT t.id, t.ticket_number, t.status, t.project_id,
                                      p.name, p.web_path, p.app_path
                               FROM tickets t
                               JOIN projects p ON t.project_id = p.id"#;

const MESSAGE_SELECT: &str = r#"SELECT id, ticket_id, role, content, token_count, is_summarized
                                FROM conversation_messages"#;

const EXTRACTION_SELECT: &str = r#"SELECT id, ticket_id, tokens_before, tokens_after,
                                          messages_summarized, decisions, files_modified,
                                          known_gotchas, summary, first_message_id,
                                          last_message_id, created_at
                                   FROM ticket_extractions"#;

fn query_unsummarized(
    conn: &Connection,
    ticket_id: i64,
    limit: Option<usize>,
) -> Result<Vec<ConversationMessage>> {
    let limit = limit.map_or(-1, |l| l as i64);
    let mut stmt = conn.prepare(&format!(
        "{MESSAGE_SELECT} WHERE ticket_id = ? AND is_summarized = FALSE ORDER BY id LIMIT ?"
    ))?;
    let rows = stmt.query_map(params![ticket_id, limit], map_message)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Into::into)
}

fn query_latest_extraction(conn: &Connection, ticket_id: i64) -> Result<Option<Extraction>> {
    let extraction = conn
        .query_row(
            &format!("{EXTRACTION_SELECT} WHERE ticket_id = ? ORDER BY id DESC LIMIT 1"),
            params![ticket_id],
            map_extraction,
        )
        .optional()?;
    Ok(extraction)
}

fn map_ticket(row: &Row) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        ticket_number: row.get(1)?,
        status: row.get(2)?,
        project_id: row.get(3)?,
        project_name: row.get(4)?,
        web_path: row.get(5)?,
        app_path: row.get(6)?,
    })
}

fn map_message(row: &Row) -> rusqlite::Result<ConversationMessage> {
    let role: String = row.get(2)?;
    let role = Role::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown role '{role}'").into(),
        )
    })?;
    let token_count: i64 = row.get(4)?;

    Ok(ConversationMessage {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        role,
        content: row.get(3)?,
        token_count: token_count.max(0) as usize,
        is_summarized: row.get(5)?,
        is_summary: false,
    })
}

fn map_extraction(row: &Row) -> rusqlite::Result<Extraction> {
    let tokens_before: i64 = row.get(2)?;
    let tokens_after: i64 = row.get(3)?;
    let messages_summarized: i64 = row.get(4)?;

    Ok(Extraction {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        tokens_before: tokens_before.max(0) as usize,
        tokens_after: tokens_after.max(0) as usize,
        messages_summarized: messages_summarized.max(0) as usize,
        decisions: decode_list(row.get(5)?),
        files_modified: decode_list(row.get(6)?),
        known_gotchas: decode_list(row.get(7)?),
        summary: row.get(8)?,
        first_message_id: row.get(9)?,
        last_message_id: row.get(10)?,
        created_at: row.get(11)?,
    })
}

/// Read a list column that may hold a JSON array or free text
///
/// Free text becomes one entry per non-empty line, with list bullets stripped.
fn decode_list(raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else {
        return vec![];
    };
    let trimmed = raw.trim();

    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
            return items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    trimmed
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '*']).trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}
