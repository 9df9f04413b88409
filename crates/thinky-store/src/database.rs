//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] behind a mutex so
//! one handle can be shared across async tasks, and guarantees that
//! migrations are run before any other operation. It also owns the broadcast
//! sender behind the realtime change stream.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use directories::ProjectDirs;
use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::changes::{ChangeEvent, CHANGE_BUFFER};
use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`] plus the change stream.
pub struct Database {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/thinky/thinky.db`
    /// - macOS:   `~/Library/Application Support/com.thinky.thinky/thinky.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\thinky\thinky\data\thinky.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "thinky", "thinky").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("thinky.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        let (changes, _) = broadcast::channel(CHANGE_BUFFER);

        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Lock the underlying connection.
    ///
    /// A poisoned lock only means another thread panicked between statements;
    /// the connection itself is still consistent, so the guard is recovered.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The change-stream sender (subscribe via [`Database::subscribe`]).
    pub(crate) fn changes(&self) -> &broadcast::Sender<ChangeEvent> {
        &self.changes
    }

    /// Publish a change event. Silently a no-op with no live subscribers.
    pub(crate) fn publish(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn().path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn reopen_preserves_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        drop(Database::open_at(&path).expect("first open"));
        Database::open_at(&path).expect("second open runs no migration twice");
    }
}
