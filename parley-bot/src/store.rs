//! `SQLite`-backed dialog storage.
//!
//! The store owns every persisted fact: the ordered message log per dialog,
//! the overflow state flag, the per-user "not wanted" notice flag, and the
//! last-interaction timestamp used for staleness expiry. Flags carry a TTL;
//! expired rows read as absent.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use anyhow::Result;
use chrono::Local;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Flag TTL shared by `dialog_state` and `not_wanted_sent` (7 days).
const FLAG_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Role of a dialog turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// String form for database storage and the OpenAI wire format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse from storage; unknown text falls back to `User`.
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }
}

/// One immutable turn of a dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogMessage {
    pub role: Role,
    pub content: String,
}

impl DialogMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Whether a dialog is blocked on a length-limit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogState {
    #[default]
    None,
    /// The last completion overflowed; the next message is a decision reply.
    ContextLimit,
}

impl DialogState {
    fn to_db(self) -> i64 {
        match self {
            Self::None => 0,
            Self::ContextLimit => 1,
        }
    }

    fn from_db(value: i64) -> Self {
        if value == 1 {
            Self::ContextLimit
        } else {
            Self::None
        }
    }
}

/// `SQLite` dialog store.
///
/// All operations hold the connection mutex for their full duration, so each
/// call is atomic with respect to concurrent readers - a reader never sees a
/// half-written message list.
pub struct DialogStore {
    conn: Mutex<Connection>,
}

impl DialogStore {
    /// Open (or create) the store at the given database path.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                dialog_id   TEXT NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_dialog ON messages(dialog_id, id);
            CREATE TABLE IF NOT EXISTS dialog_state (
                dialog_id   TEXT PRIMARY KEY,
                state       INTEGER NOT NULL,
                expires_at  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS not_wanted_sent (
                user_id     INTEGER PRIMARY KEY,
                expires_at  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS last_interaction (
                dialog_id   TEXT PRIMARY KEY,
                at          INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))
    }

    // ── Message log ─────────────────────────────────────────────────

    /// Append a turn and refresh the dialog's last-interaction time.
    pub fn append(&self, dialog_id: &str, msg: &DialogMessage) -> Result<()> {
        let conn = self.lock()?;
        let now = Local::now().timestamp();

        conn.execute(
            "INSERT INTO messages (dialog_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![dialog_id, msg.role.as_str(), msg.content, now],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO last_interaction (dialog_id, at) VALUES (?1, ?2)",
            params![dialog_id, now],
        )?;

        Ok(())
    }

    /// All turns of a dialog in insertion order.
    pub fn read_all(&self, dialog_id: &str) -> Result<Vec<DialogMessage>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages
             WHERE dialog_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![dialog_id], |row| {
            Ok(DialogMessage {
                role: Role::parse(&row.get::<_, String>(0)?),
                content: row.get(1)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Number of turns in a dialog.
    pub fn count(&self, dialog_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE dialog_id = ?1",
            params![dialog_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete every turn of a dialog.
    pub fn delete_all(&self, dialog_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM messages WHERE dialog_id = ?1",
            params![dialog_id],
        )?;
        Ok(deleted)
    }

    /// Drop the oldest `count` turns, keeping the rest in order.
    pub fn trim_first(&self, dialog_id: &str, count: usize) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM messages WHERE id IN (
                 SELECT id FROM messages WHERE dialog_id = ?1
                 ORDER BY id ASC LIMIT ?2
             )",
            params![dialog_id, count as i64],
        )?;
        Ok(deleted)
    }

    /// Replace the whole dialog with a single turn.
    pub fn replace_all(&self, dialog_id: &str, msg: &DialogMessage) -> Result<()> {
        let mut conn = self.lock()?;
        let now = Local::now().timestamp();

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE dialog_id = ?1",
            params![dialog_id],
        )?;
        tx.execute(
            "INSERT INTO messages (dialog_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![dialog_id, msg.role.as_str(), msg.content, now],
        )?;
        tx.commit()?;

        Ok(())
    }

    // ── Overflow state flag ─────────────────────────────────────────

    /// Set the overflow state. `DialogState::None` deletes the row.
    pub fn set_state(&self, dialog_id: &str, state: DialogState) -> Result<()> {
        let conn = self.lock()?;

        if state == DialogState::None {
            conn.execute(
                "DELETE FROM dialog_state WHERE dialog_id = ?1",
                params![dialog_id],
            )?;
            return Ok(());
        }

        let expires_at = Local::now().timestamp() + FLAG_TTL_SECS;
        conn.execute(
            "INSERT OR REPLACE INTO dialog_state (dialog_id, state, expires_at)
             VALUES (?1, ?2, ?3)",
            params![dialog_id, state.to_db(), expires_at],
        )?;
        Ok(())
    }

    /// Read the overflow state; absent or expired rows are `None`.
    pub fn get_state(&self, dialog_id: &str) -> Result<DialogState> {
        let conn = self.lock()?;
        let now = Local::now().timestamp();

        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT state, expires_at FROM dialog_state WHERE dialog_id = ?1",
                params![dialog_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match row {
            Some((state, expires_at)) if expires_at > now => Ok(DialogState::from_db(state)),
            _ => Ok(DialogState::None),
        }
    }

    // ── Not-wanted notice flag ──────────────────────────────────────

    /// Whether the rejection notice was already sent to this user recently.
    pub fn not_wanted_sent(&self, user_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let now = Local::now().timestamp();

        let expires_at: Option<i64> = conn
            .query_row(
                "SELECT expires_at FROM not_wanted_sent WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(matches!(expires_at, Some(at) if at > now))
    }

    /// Record that the rejection notice was sent; expires after 7 days.
    pub fn set_not_wanted_sent(&self, user_id: i64) -> Result<()> {
        let conn = self.lock()?;
        let expires_at = Local::now().timestamp() + FLAG_TTL_SECS;
        conn.execute(
            "INSERT OR REPLACE INTO not_wanted_sent (user_id, expires_at) VALUES (?1, ?2)",
            params![user_id, expires_at],
        )?;
        Ok(())
    }

    // ── Last interaction ────────────────────────────────────────────

    /// Unix timestamp of the dialog's last append, if any.
    pub fn get_last_interaction(&self, dialog_id: &str) -> Result<Option<i64>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT at FROM last_interaction WHERE dialog_id = ?1",
            params![dialog_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .map_err(Into::into)
    }

    /// Backdate all flag expiries, so tests can observe TTL behavior.
    #[cfg(test)]
    fn expire_all_flags(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("UPDATE dialog_state SET expires_at = 0", [])?;
        conn.execute("UPDATE not_wanted_sent SET expires_at = 0", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> DialogStore {
        DialogStore::in_memory().unwrap()
    }

    fn user(content: &str) -> DialogMessage {
        DialogMessage::new(Role::User, content)
    }

    #[test]
    fn role_round_trip() {
        assert_eq!(Role::parse(Role::User.as_str()), Role::User);
        assert_eq!(Role::parse(Role::Assistant.as_str()), Role::Assistant);
        assert_eq!(Role::parse("garbage"), Role::User);
    }

    #[test]
    fn append_then_read_preserves_order() {
        let store = store();
        let key = "chat:42";

        for i in 0..5 {
            store.append(key, &user(&format!("turn {i}"))).unwrap();
        }

        let messages = store.read_all(key).unwrap();
        assert_eq!(messages.len(), 5);
        for (i, msg) in messages.iter().enumerate() {
            assert_eq!(msg.content, format!("turn {i}"));
        }
    }

    #[test]
    fn dialogs_are_isolated() {
        let store = store();
        store.append("chat:1", &user("one")).unwrap();
        store.append("chat:2", &user("two")).unwrap();

        assert_eq!(store.read_all("chat:1").unwrap().len(), 1);
        assert_eq!(store.read_all("chat:2").unwrap()[0].content, "two");
    }

    #[test]
    fn delete_all_empties_dialog() {
        let store = store();
        let key = "chat:42";
        store.append(key, &user("a")).unwrap();
        store.append(key, &user("b")).unwrap();

        assert_eq!(store.delete_all(key).unwrap(), 2);
        assert!(store.read_all(key).unwrap().is_empty());
    }

    #[test]
    fn trim_first_keeps_newest_in_order() {
        let store = store();
        let key = "chat:42";
        for i in 0..10 {
            store.append(key, &user(&format!("turn {i}"))).unwrap();
        }

        assert_eq!(store.trim_first(key, 5).unwrap(), 5);

        let rest = store.read_all(key).unwrap();
        assert_eq!(rest.len(), 5);
        assert_eq!(rest[0].content, "turn 5");
        assert_eq!(rest[4].content, "turn 9");
    }

    #[test]
    fn trim_first_bounds() {
        let store = store();
        let key = "chat:42";
        for i in 0..3 {
            store.append(key, &user(&format!("turn {i}"))).unwrap();
        }

        assert_eq!(store.trim_first(key, 0).unwrap(), 0);
        assert_eq!(store.count(key).unwrap(), 3);

        assert_eq!(store.trim_first(key, 3).unwrap(), 3);
        assert_eq!(store.count(key).unwrap(), 0);
    }

    #[test]
    fn replace_all_leaves_single_turn() {
        let store = store();
        let key = "chat:42";
        for i in 0..4 {
            store.append(key, &user(&format!("turn {i}"))).unwrap();
        }

        store.replace_all(key, &user("summary")).unwrap();

        let messages = store.read_all(key).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "summary");
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn state_defaults_to_none() {
        let store = store();
        assert_eq!(store.get_state("chat:42").unwrap(), DialogState::None);
    }

    #[test]
    fn state_round_trip_and_clear() {
        let store = store();
        let key = "chat:42";

        store.set_state(key, DialogState::ContextLimit).unwrap();
        assert_eq!(store.get_state(key).unwrap(), DialogState::ContextLimit);

        store.set_state(key, DialogState::None).unwrap();
        assert_eq!(store.get_state(key).unwrap(), DialogState::None);
    }

    #[test]
    fn expired_state_reads_as_none() {
        let store = store();
        let key = "chat:42";

        store.set_state(key, DialogState::ContextLimit).unwrap();
        store.expire_all_flags().unwrap();

        assert_eq!(store.get_state(key).unwrap(), DialogState::None);
    }

    #[test]
    fn not_wanted_flag_round_trip() {
        let store = store();

        assert!(!store.not_wanted_sent(1001).unwrap());
        store.set_not_wanted_sent(1001).unwrap();
        assert!(store.not_wanted_sent(1001).unwrap());
        assert!(!store.not_wanted_sent(1002).unwrap());
    }

    #[test]
    fn expired_not_wanted_flag_reads_as_unsent() {
        let store = store();

        store.set_not_wanted_sent(1001).unwrap();
        store.expire_all_flags().unwrap();
        assert!(!store.not_wanted_sent(1001).unwrap());
    }

    #[test]
    fn last_interaction_tracks_appends() {
        let store = store();
        let key = "chat:42";

        assert!(store.get_last_interaction(key).unwrap().is_none());

        store.append(key, &user("hello")).unwrap();
        let at = store.get_last_interaction(key).unwrap().unwrap();
        assert!(at > 0);
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("parley.db");
        let key = "chat:42";

        {
            let store = DialogStore::new(&db_path).unwrap();
            store.append(key, &user("persistent")).unwrap();
        }
        {
            let store = DialogStore::new(&db_path).unwrap();
            let messages = store.read_all(key).unwrap();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].content, "persistent");
        }
    }

    #[test]
    fn unicode_content_round_trips() {
        let store = store();
        let content = "你好世界 🚀 مرحبا";
        store.append("chat:42", &user(content)).unwrap();
        assert_eq!(store.read_all("chat:42").unwrap()[0].content, content);
    }
}
