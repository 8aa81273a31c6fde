pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

pub use error::{DbError, Result, UniqueField};

use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Storage engines the service knows how to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
}

impl FromStr for Backend {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Backend::Sqlite),
            other => Err(DbError::UnknownBackend(other.to_string())),
        }
    }
}

/// Owns the SQLite connection. Every repository call runs as one scoped unit
/// of work: rows are materialized before the guard is released, so nothing
/// that borrows the connection ever escapes.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn connect(backend: Backend, location: &Path) -> Result<Self> {
        match backend {
            Backend::Sqlite => Self::open(location),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::LockPoisoned(e.to_string()))
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits on `Ok`; an `Err` (or a panic)
    /// drops the transaction uncommitted, which rolls it back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_backends() {
        assert_eq!("sqlite".parse::<Backend>().unwrap(), Backend::Sqlite);
        assert_eq!(" SQLite3 ".parse::<Backend>().unwrap(), Backend::Sqlite);
    }

    #[test]
    fn rejects_unknown_backend() {
        match "mysql".parse::<Backend>() {
            Err(DbError::UnknownBackend(name)) => assert_eq!(name, "mysql"),
            other => panic!("expected UnknownBackend, got {:?}", other),
        }
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let db = Database::open_in_memory().unwrap();

        let res: Result<()> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO users (username, email, password) VALUES ('a', 'a@x.com', 'h')",
                [],
            )?;
            Err(DbError::LockPoisoned("forced".into()))
        });
        assert!(res.is_err());

        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.db");

        {
            let db = Database::connect(Backend::Sqlite, &path).unwrap();
            db.create_user("alice", "a@x.com", "hash", None).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert!(db.get_user_by_username("alice").unwrap().is_some());
    }
}
