//! SQLite message history.
//!
//! Every prompt shown and every reply sent is appended here so the user can
//! look back across sessions (`review-gate history`). The store is
//! best-effort: the controller logs failures and carries on.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use review_gate_protocol::Attachment;
use rusqlite::{params, Connection, OpenFlags, Row};

use crate::error::{GateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Prompt from the agent.
    System,
    /// Reply to an active trigger.
    User,
    /// Input typed while no trigger was active.
    Plain,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::System => "system",
            MessageKind::User => "user",
            MessageKind::Plain => "plain",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "system" => MessageKind::System,
            "user" => MessageKind::User,
            _ => MessageKind::Plain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    pub trigger_id: Option<String>,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: String,
    /// `YYYY-MM-DD`, used for per-day browsing.
    pub date: String,
    pub attachments: Vec<Attachment>,
}

impl MessageRecord {
    pub fn new(trigger_id: Option<&str>, kind: MessageKind, content: &str) -> Self {
        Self::at(Utc::now(), trigger_id, kind, content)
    }

    pub fn at(now: DateTime<Utc>, trigger_id: Option<&str>, kind: MessageKind, content: &str) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            trigger_id: trigger_id.map(str::to_string),
            kind,
            content: content.to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            date: now.format("%Y-%m-%d").to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

pub struct MessageStore {
    path: PathBuf,
}

const SELECT_COLUMNS: &str =
    "SELECT id, trigger_id, message_type, content, timestamp, date, attachments FROM messages";

impl MessageStore {
    pub fn open(path: &Path) -> Result<Self> {
        let store = Self {
            path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, message: &MessageRecord) -> Result<()> {
        let attachments = if message.attachments.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&message.attachments)
                    .map_err(|e| GateError::json("Failed to serialize attachments", e))?,
            )
        };

        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO messages \
                 (id, trigger_id, message_type, content, timestamp, date, has_attachments, attachments) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id,
                    message.trigger_id,
                    message.kind.as_str(),
                    message.content,
                    message.timestamp,
                    message.date,
                    attachments.is_some(),
                    attachments,
                ],
            )
            .map_err(|e| GateError::history("Failed to insert message", e))?;
            Ok(())
        })
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<MessageRecord>> {
        self.query(
            &format!("{SELECT_COLUMNS} ORDER BY timestamp DESC, rowid DESC LIMIT ?1"),
            params![limit as i64],
        )
    }

    pub fn by_date(&self, date: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE date = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT ?2"),
            params![date, limit as i64],
        )
    }

    /// Substring search over message content, newest first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let pattern = format!("%{}%", escape_like(query));
        self.query(
            &format!(
                "{SELECT_COLUMNS} WHERE content LIKE ?1 ESCAPE '\\' \
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?2"
            ),
            params![pattern, limit as i64],
        )
    }

    pub fn available_dates(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT date FROM messages ORDER BY date DESC")
                .map_err(|e| GateError::history("Failed to prepare dates query", e))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| GateError::history("Failed to read dates", e))?;
            let dates = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| GateError::history("Failed to decode date row", e));
            dates
        })
    }

    fn query(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<MessageRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| GateError::history("Failed to prepare messages query", e))?;
            let rows = stmt
                .query_map(args, read_row)
                .map_err(|e| GateError::history("Failed to read messages", e))?;
            let messages = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| GateError::history("Failed to decode message row", e));
            messages
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    trigger_id TEXT,
                    message_type TEXT NOT NULL,
                    content TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    date TEXT NOT NULL,
                    has_attachments INTEGER NOT NULL DEFAULT 0,
                    attachments TEXT
                 );
                 CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date);
                 CREATE INDEX IF NOT EXISTS idx_messages_trigger_id ON messages(trigger_id);
                 CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
                 COMMIT;",
            )
            .map_err(|e| GateError::history("Failed to initialize schema", e))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.connect()?;
        op(&mut conn)
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|e| GateError::io("Failed to create history directory", e))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|e| GateError::history("Failed to open history database", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| GateError::history("Failed to enable WAL", e))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| GateError::history("Failed to set busy_timeout", e))?;
        Ok(conn)
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let kind: String = row.get(2)?;
    let attachments: Option<String> = row.get(6)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        trigger_id: row.get(1)?,
        kind: MessageKind::parse(&kind),
        content: row.get(3)?,
        timestamp: row.get(4)?,
        date: row.get(5)?,
        attachments: attachments
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
    })
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
