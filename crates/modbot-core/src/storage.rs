//! SQLite persistence for users, quotes, auto-quotes, settings and custom
//! commands.
//!
//! The connection sits behind a blocking mutex; every operation is a handful
//! of small statements, so handlers call these directly from async code.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use rusqlite::{params, Connection, OptionalExtension};

use crate::{errors::Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub current_guess: Option<i64>,
    pub total_guess: Option<i64>,
    pub entered_in_contest: bool,
    pub times_played: i64,
    pub points: i64,
    pub whitelisted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quote {
    pub id: i64,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutoQuote {
    pub id: i64,
    pub text: String,
    pub period_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomCommand {
    pub id: i64,
    pub call: String,
    pub response: String,
    /// Users allowed to trigger the command. Empty means everyone.
    pub permitted_users: Vec<String>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    current_guess INTEGER,
    total_guess INTEGER,
    entered_in_contest INTEGER NOT NULL DEFAULT 0,
    times_played INTEGER NOT NULL DEFAULT 0,
    points INTEGER NOT NULL DEFAULT 0,
    whitelisted INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS quotes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    quote TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS auto_quotes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    quote TEXT NOT NULL,
    period INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS misc_values (
    id INTEGER PRIMARY KEY,
    mv_key TEXT NOT NULL UNIQUE,
    mv_value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS commands (
    id INTEGER PRIMARY KEY,
    call TEXT NOT NULL UNIQUE,
    response TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS permissions (
    id INTEGER PRIMARY KEY,
    command_id INTEGER NOT NULL REFERENCES commands(id) ON DELETE CASCADE,
    user_entity TEXT NOT NULL,
    UNIQUE(command_id, user_entity)
);
";

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        tracing::info!(db = %path.display(), "store initialized");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| Error::External(format!("database mutex poisoned: {e}")))
    }

    // ============== Users ==============

    /// Make sure a row exists for `name` (lowercased) and return its id.
    pub fn ensure_user(&self, name: &str) -> Result<i64> {
        let name = name.to_lowercase();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO users (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let id = db.query_row(
            "SELECT id FROM users WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_user(&self, name: &str) -> Result<Option<User>> {
        let db = self.conn()?;
        let user = db
            .query_row(
                "SELECT id, name, current_guess, total_guess, entered_in_contest,
                        times_played, points, whitelisted
                 FROM users WHERE name = ?1",
                params![name.to_lowercase()],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        current_guess: row.get(2)?,
                        total_guess: row.get(3)?,
                        entered_in_contest: row.get::<_, i32>(4)? != 0,
                        times_played: row.get(5)?,
                        points: row.get(6)?,
                        whitelisted: row.get::<_, i32>(7)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ============== Quotes ==============

    /// All quotes in position order (oldest first).
    pub fn list_quotes(&self) -> Result<Vec<Quote>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT id, quote FROM quotes ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Quote {
                id: row.get(0)?,
                text: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Insert a quote and return the new quote count.
    pub fn add_quote(&self, text: &str) -> Result<usize> {
        let db = self.conn()?;
        db.execute("INSERT INTO quotes (quote) VALUES (?1)", params![text])?;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM quotes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn update_quote(&self, id: i64, text: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "UPDATE quotes SET quote = ?1 WHERE id = ?2",
            params![text, id],
        )?;
        Ok(n > 0)
    }

    pub fn delete_quote(&self, id: i64) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM quotes WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Replace every quote with `texts`, in order, atomically.
    pub fn replace_quotes(&self, texts: &[String]) -> Result<usize> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM quotes", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO quotes (quote) VALUES (?1)")?;
            for text in texts {
                stmt.execute(params![text])?;
            }
        }
        tx.commit()?;
        Ok(texts.len())
    }

    // ============== Auto quotes ==============

    pub fn list_auto_quotes(&self) -> Result<Vec<AutoQuote>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT id, quote, period FROM auto_quotes ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(AutoQuote {
                id: row.get(0)?,
                text: row.get(1)?,
                period_secs: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Insert an auto-quote and return the new auto-quote count.
    pub fn add_auto_quote(&self, text: &str, period_secs: u64) -> Result<usize> {
        let period = i64::try_from(period_secs).map_err(|e| {
            Error::Storage(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        })?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO auto_quotes (quote, period) VALUES (?1, ?2)",
            params![text, period],
        )?;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM auto_quotes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn delete_auto_quote(&self, id: i64) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM auto_quotes WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    // ============== Misc values ==============

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let db = self.conn()?;
        let value = db
            .query_row(
                "SELECT mv_value FROM misc_values WHERE mv_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO misc_values (mv_key, mv_value) VALUES (?1, ?2)
             ON CONFLICT(mv_key) DO UPDATE SET mv_value = excluded.mv_value",
            params![key, value],
        )?;
        Ok(())
    }

    // ============== Custom commands ==============

    pub fn find_command(&self, call: &str) -> Result<Option<CustomCommand>> {
        let call = call.to_lowercase();
        let db = self.conn()?;
        let found: Option<(i64, String, String)> = db
            .query_row(
                "SELECT id, call, response FROM commands WHERE call = ?1",
                params![call],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((id, call, response)) = found else {
            return Ok(None);
        };

        let mut stmt =
            db.prepare("SELECT user_entity FROM permissions WHERE command_id = ?1 ORDER BY id")?;
        let permitted_users = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(CustomCommand {
            id,
            call,
            response,
            permitted_users,
        }))
    }

    pub fn list_command_calls(&self) -> Result<Vec<String>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT call FROM commands ORDER BY call")?;
        let calls = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(calls)
    }

    /// Returns `false` if a command with this call already exists.
    pub fn add_command(&self, call: &str, response: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "INSERT INTO commands (call, response) VALUES (?1, ?2) ON CONFLICT(call) DO NOTHING",
            params![call.to_lowercase(), response],
        )?;
        Ok(n > 0)
    }

    pub fn delete_command(&self, call: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM commands WHERE call = ?1",
            params![call.to_lowercase()],
        )?;
        Ok(n > 0)
    }

    /// Returns `false` if the command does not exist or the user was already permitted.
    pub fn add_permission(&self, call: &str, user: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "INSERT INTO permissions (command_id, user_entity)
             SELECT id, ?2 FROM commands WHERE call = ?1
             ON CONFLICT(command_id, user_entity) DO NOTHING",
            params![call.to_lowercase(), user.to_lowercase()],
        )?;
        Ok(n > 0)
    }

    pub fn remove_permission(&self, call: &str, user: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM permissions
             WHERE user_entity = ?2
               AND command_id = (SELECT id FROM commands WHERE call = ?1)",
            params![call.to_lowercase(), user.to_lowercase()],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_user_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = store.ensure_user("Alice").unwrap();
        let b = store.ensure_user("alice").unwrap();
        assert_eq!(a, b);

        let user = store.get_user("ALICE").unwrap().unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.points, 0);
        assert!(!user.whitelisted);
    }

    #[test]
    fn quotes_keep_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.add_quote("one").unwrap(), 1);
        assert_eq!(store.add_quote("two").unwrap(), 2);

        let quotes = store.list_quotes().unwrap();
        let texts: Vec<_> = quotes.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);

        assert!(store.delete_quote(quotes[0].id).unwrap());
        assert!(!store.delete_quote(quotes[0].id).unwrap());
        assert_eq!(store.list_quotes().unwrap().len(), 1);
    }

    #[test]
    fn replace_quotes_swaps_everything() {
        let store = Store::open_in_memory().unwrap();
        store.add_quote("old").unwrap();
        store
            .replace_quotes(&["a".to_string(), "b".to_string()])
            .unwrap();
        let texts: Vec<_> = store
            .list_quotes()
            .unwrap()
            .into_iter()
            .map(|q| q.text)
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn misc_values_upsert() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_value("k").unwrap(), None);
        store.set_value("k", "1").unwrap();
        store.set_value("k", "2").unwrap();
        assert_eq!(store.get_value("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn command_permissions_cascade_on_delete() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.add_command("Hype", "HYPE!").unwrap());
        assert!(!store.add_command("hype", "again").unwrap());
        assert!(store.add_permission("hype", "Bob").unwrap());
        assert!(!store.add_permission("hype", "bob").unwrap());
        assert!(!store.add_permission("missing", "bob").unwrap());

        let cmd = store.find_command("HYPE").unwrap().unwrap();
        assert_eq!(cmd.response, "HYPE!");
        assert_eq!(cmd.permitted_users, vec!["bob"]);

        assert!(store.delete_command("hype").unwrap());
        assert!(store.find_command("hype").unwrap().is_none());
        assert!(store.add_command("hype", "back").unwrap());
        assert!(store
            .find_command("hype")
            .unwrap()
            .unwrap()
            .permitted_users
            .is_empty());
    }

    #[test]
    fn auto_quotes_round_trip_period() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.add_auto_quote("drink water", 600).unwrap(), 1);
        let all = store.list_auto_quotes().unwrap();
        assert_eq!(all[0].period_secs, 600);
        assert!(store.delete_auto_quote(all[0].id).unwrap());
    }

    #[test]
    fn auto_quote_period_must_fit_the_column() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.add_auto_quote("huge", u64::MAX),
            Err(Error::Storage(_))
        ));
        assert!(store.list_auto_quotes().unwrap().is_empty());
    }
}
