use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tc_types::session::SessionRecord;

use crate::store::SessionStore;

const SESSION_COLUMNS: &str = "id, correlation_id, owner, project_path, project_name,
     created_at, last_active, total_cost_usd, status";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn init_tables(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id             TEXT PRIMARY KEY,
                correlation_id TEXT,
                owner          INTEGER NOT NULL,
                project_path   TEXT NOT NULL,
                project_name   TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                last_active    TEXT NOT NULL,
                total_cost_usd REAL NOT NULL DEFAULT 0,
                status         TEXT NOT NULL DEFAULT 'active'
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner, last_active);",
        )?;
        Ok(())
    }

    // --- Sessions ---

    fn query_sessions(&self, sql: &str, owner: Option<i64>) -> Result<Vec<SessionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let raw: Vec<RawSession> = match owner {
            Some(owner) => stmt
                .query_map(params![owner], RawSession::from_row)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map([], RawSession::from_row)?
                .collect::<rusqlite::Result<_>>()?,
        };
        raw.into_iter().map(RawSession::into_record).collect()
    }
}

impl SessionStore for Database {
    fn save(&self, record: &SessionRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (id, correlation_id, owner, project_path, project_name,
                                   created_at, last_active, total_cost_usd, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                correlation_id = excluded.correlation_id,
                owner          = excluded.owner,
                project_path   = excluded.project_path,
                project_name   = excluded.project_name,
                last_active    = excluded.last_active,
                total_cost_usd = excluded.total_cost_usd,
                status         = excluded.status",
            params![
                record.id,
                record.correlation_id,
                record.owner,
                record.project_path,
                record.project_name,
                format_time(&record.created_at),
                format_time(&record.last_active),
                record.total_cost_usd,
                record.status.to_string(),
            ],
        )
        .with_context(|| format!("Failed to save session {}", record.id))?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<SessionRecord>> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                RawSession::from_row,
            )
            .optional()?
        };
        raw.map(RawSession::into_record).transpose()
    }

    fn list_by_owner(&self, owner: i64) -> Result<Vec<SessionRecord>> {
        self.query_sessions(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE owner = ?1 ORDER BY last_active DESC"
            ),
            Some(owner),
        )
    }

    fn list_all(&self) -> Result<Vec<SessionRecord>> {
        self.query_sessions(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY last_active DESC"),
            None,
        )
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn total_cost_for_owner(&self, owner: i64) -> Result<f64> {
        let conn = self.conn()?;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(total_cost_usd), 0) FROM sessions WHERE owner = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

struct RawSession {
    id: String,
    correlation_id: Option<String>,
    owner: i64,
    project_path: String,
    project_name: String,
    created_at: String,
    last_active: String,
    total_cost_usd: f64,
    status: String,
}

impl RawSession {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            correlation_id: row.get(1)?,
            owner: row.get(2)?,
            project_path: row.get(3)?,
            project_name: row.get(4)?,
            created_at: row.get(5)?,
            last_active: row.get(6)?,
            total_cost_usd: row.get(7)?,
            status: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<SessionRecord> {
        Ok(SessionRecord {
            status: self.status.parse().context("invalid status")?,
            created_at: parse_time(&self.created_at)?,
            last_active: parse_time(&self.last_active)?,
            id: self.id,
            correlation_id: self.correlation_id,
            owner: self.owner,
            project_path: self.project_path,
            project_name: self.project_name,
            total_cost_usd: self.total_cost_usd,
        })
    }
}

/// Fixed-width UTC timestamps, so text ordering matches time ordering.
fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp {s:?}"))?
        .with_timezone(&Utc))
}
