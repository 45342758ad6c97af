//! File-backed conversation history and user memories.

use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agent_messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT    NOT NULL,
    user_id     TEXT    NOT NULL,
    role        TEXT    NOT NULL,
    content     TEXT    NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agent_messages_session ON agent_messages (session_id, id);
CREATE TABLE IF NOT EXISTS user_memories (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT    NOT NULL,
    memory      TEXT    NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_user_memories_user ON user_memories (user_id, id);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMemory {
    pub id: i64,
    pub memory: String,
    pub updated_at: i64,
}

/// Handle to the memory database. Clones share one connection.
#[derive(Clone)]
pub struct MemoryDb {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDb").field("path", &self.path).finish_non_exhaustive()
    }
}

impl MemoryDb {
    /// Open (creating if needed) the database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the schema cannot be applied.
    #[allow(clippy::result_large_err)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        tracing::info!(path = %path.display(), "opened agent memory store");
        Self::init(conn, Some(path))
    }

    /// # Errors
    /// Returns an error if the schema cannot be applied.
    #[allow(clippy::result_large_err)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    #[allow(clippy::result_large_err)]
    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), path })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[allow(clippy::result_large_err)]
    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::InvalidState("memory store lock poisoned".to_string()))
    }

    /// # Errors
    /// Returns an error if the insert fails.
    #[allow(clippy::result_large_err)]
    pub fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO agent_messages (session_id, user_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, user_id, role.as_str(), content, now_millis()],
        )?;
        Ok(())
    }

    /// The last `limit` messages of a session, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    #[allow(clippy::result_large_err)]
    pub fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM agent_messages
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![session_id, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;
        let mut messages = Vec::new();
        for row in rows {
            let (role, content, created_at) = row?;
            if let Some(role) = MessageRole::parse(&role) {
                messages.push(StoredMessage { role, content, created_at });
            }
        }
        messages.reverse();
        Ok(messages)
    }

    /// # Errors
    /// Returns an error if the insert fails.
    #[allow(clippy::result_large_err)]
    pub fn add_user_memory(&self, user_id: &str, memory: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO user_memories (user_id, memory, updated_at) VALUES (?1, ?2, ?3)",
            params![user_id, memory, now_millis()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// # Errors
    /// Returns an error if the query fails.
    #[allow(clippy::result_large_err)]
    pub fn user_memories(&self, user_id: &str) -> Result<Vec<UserMemory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, memory, updated_at FROM user_memories WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(UserMemory { id: row.get(0)?, memory: row.get(1)?, updated_at: row.get(2)? })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    /// Delete one memory. Returns `false` if it did not exist for this user.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    #[allow(clippy::result_large_err)]
    pub fn delete_user_memory(&self, user_id: &str, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM user_memories WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if found.is_none() {
            return Ok(false);
        }
        conn.execute("DELETE FROM user_memories WHERE id = ?1", params![id])?;
        Ok(true)
    }

    /// # Errors
    /// Returns an error if the delete fails.
    #[allow(clippy::result_large_err)]
    pub fn clear_user_memories(&self, user_id: &str) -> Result<usize> {
        Ok(self.lock()?.execute("DELETE FROM user_memories WHERE user_id = ?1", params![user_id])?)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
