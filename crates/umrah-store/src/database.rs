//! The SQLite file behind the push worker's offline cache.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

const CACHE_FILE: &str = "push-cache.db";

/// An open cache database with its schema already current.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open `push-cache.db` under the platform data directory for
    /// `com.umrah.umrah`, creating the directory if needed.
    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("com", "umrah", "umrah").ok_or(StoreError::NoDataDir)?;
        std::fs::create_dir_all(dirs.data_dir())?;
        let path = dirs.data_dir().join(CACHE_FILE);
        tracing::info!(path = %path.display(), "Opening offline cache database");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepared(conn)
    }

    /// In-memory database for tests and hosts without a writable disk.
    pub fn open_in_memory() -> Result<Self> {
        Self::prepared(Connection::open_in_memory()?)
    }

    fn prepared(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// `None` for in-memory databases.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopening_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CACHE_FILE);

        let first = Database::open_at(&file).unwrap();
        assert!(first.path().is_some());
        drop(first);

        let again = Database::open_at(&file).unwrap();
        assert_eq!(migrations::schema_version(again.conn()).unwrap(), 1);
    }

    #[test]
    fn memory_database_has_no_path() {
        assert!(Database::open_in_memory().unwrap().path().is_none());
    }
}
