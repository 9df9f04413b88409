//! Presence heartbeat registry.
//!
//! Each device upserts its own row, so repeated heartbeats are idempotent
//! updates and no cross-device write race exists. Readers decide liveness by
//! a staleness window over `last_seen`; three call sites use three different
//! windows (active list 15 s, online badge 60 s, admin broadcast 300 s).

use chrono::Utc;
use rusqlite::params;

use thinky_shared::types::DeviceId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{PresenceRow, PresenceUpdate};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl Database {
    /// Record a heartbeat for the calling device, stamping `last_seen` now.
    pub fn heartbeat(&self, update: &PresenceUpdate) -> Result<()> {
        self.heartbeat_at(update, now_ms())
    }

    /// Upsert a presence row with an explicit timestamp.
    pub(crate) fn heartbeat_at(&self, update: &PresenceUpdate, last_seen: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO presence
                 (device_id, device_name, browser, os, username, current_page, last_seen, is_admin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(device_id) DO UPDATE SET
                 device_name = excluded.device_name,
                 browser = excluded.browser,
                 os = excluded.os,
                 username = excluded.username,
                 current_page = excluded.current_page,
                 last_seen = excluded.last_seen,
                 is_admin = excluded.is_admin",
            params![
                update.device_id.as_str(),
                update.device_name,
                update.browser,
                update.os,
                update.username,
                update.current_page,
                last_seen,
                update.is_admin,
            ],
        )?;
        Ok(())
    }

    /// Count devices seen within the trailing window (inclusive boundary).
    pub fn online_count(&self, window_secs: i64) -> Result<u32> {
        let cutoff = now_ms() - window_secs * 1000;
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM presence WHERE last_seen >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Devices seen within the window, most recent heartbeat first.
    pub fn active_devices(&self, window_secs: i64) -> Result<Vec<PresenceRow>> {
        let cutoff = now_ms() - window_secs * 1000;
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT device_id, device_name, browser, os, username, current_page,
                    last_seen, is_admin
             FROM presence
             WHERE last_seen >= ?1
             ORDER BY last_seen DESC",
        )?;

        let rows = stmt.query_map(params![cutoff], row_to_presence)?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    /// The presence row for one device, if it has ever heartbeated.
    pub fn presence_of(&self, device_id: &DeviceId) -> Result<Option<PresenceRow>> {
        let row = self.conn().query_row(
            "SELECT device_id, device_name, browser, os, username, current_page,
                    last_seen, is_admin
             FROM presence WHERE device_id = ?1",
            params![device_id.as_str()],
            row_to_presence,
        );

        match row {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Whether a device heartbeated within the window. Used by the
    /// direct-message send procedure to reject undeliverable messages.
    pub fn is_present_within(&self, device_id: &DeviceId, window_secs: i64) -> Result<bool> {
        let cutoff = now_ms() - window_secs * 1000;
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM presence WHERE device_id = ?1 AND last_seen >= ?2",
            params![device_id.as_str(), cutoff],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Best-effort removal of a device's own row on unload. Absence of a row
    /// is never used to decide liveness, so a missed call is harmless.
    pub fn remove_presence(&self, device_id: &DeviceId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM presence WHERE device_id = ?1",
            params![device_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Delete rows whose last heartbeat is older than `max_age_secs`.
    /// Run periodically server-side to keep the table small.
    pub fn purge_stale_presence(&self, max_age_secs: i64) -> Result<usize> {
        let cutoff = now_ms() - max_age_secs * 1000;
        let affected = self.conn().execute(
            "DELETE FROM presence WHERE last_seen < ?1",
            params![cutoff],
        )?;
        if affected > 0 {
            tracing::debug!(purged = affected, "purged stale presence rows");
        }
        Ok(affected)
    }
}

fn row_to_presence(row: &rusqlite::Row<'_>) -> rusqlite::Result<PresenceRow> {
    Ok(PresenceRow {
        device_id: DeviceId(row.get(0)?),
        device_name: row.get(1)?,
        browser: row.get(2)?,
        os: row.get(3)?,
        username: row.get(4)?,
        current_page: row.get(5)?,
        last_seen: row.get(6)?,
        is_admin: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn update(id: &str) -> PresenceUpdate {
        PresenceUpdate {
            device_id: DeviceId::from(id),
            device_name: "Desktop".to_string(),
            browser: "thinky-client".to_string(),
            os: "linux".to_string(),
            username: "Falcon-Crimson".to_string(),
            current_page: "community".to_string(),
            is_admin: false,
        }
    }

    #[test]
    fn heartbeat_is_idempotent_upsert() {
        let (_dir, db) = open_db();
        for _ in 0..3 {
            db.heartbeat(&update("dev-a")).unwrap();
        }
        assert_eq!(db.online_count(60).unwrap(), 1);
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let (_dir, db) = open_db();
        let now = Utc::now().timestamp_millis();

        db.heartbeat_at(&update("fresh"), now - 59_000).unwrap();
        db.heartbeat_at(&update("stale"), now - 61_000).unwrap();

        assert_eq!(db.online_count(60).unwrap(), 1);
        let active = db.active_devices(60).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].device_id.as_str(), "fresh");
    }

    #[test]
    fn three_windows_three_answers() {
        let (_dir, db) = open_db();
        let now = Utc::now().timestamp_millis();

        db.heartbeat_at(&update("recent"), now - 5_000).unwrap();
        db.heartbeat_at(&update("minutes"), now - 90_000).unwrap();
        db.heartbeat_at(&update("old"), now - 600_000).unwrap();

        assert_eq!(db.online_count(15).unwrap(), 1);
        assert_eq!(db.online_count(60).unwrap(), 1);
        assert_eq!(db.online_count(300).unwrap(), 2);
    }

    #[test]
    fn remove_is_best_effort_cleanup() {
        let (_dir, db) = open_db();
        db.heartbeat(&update("dev-a")).unwrap();

        assert!(db.remove_presence(&DeviceId::from("dev-a")).unwrap());
        assert!(!db.remove_presence(&DeviceId::from("dev-a")).unwrap());
        assert_eq!(db.online_count(60).unwrap(), 0);
    }

    #[test]
    fn purge_drops_only_old_rows() {
        let (_dir, db) = open_db();
        let now = Utc::now().timestamp_millis();

        db.heartbeat_at(&update("live"), now).unwrap();
        db.heartbeat_at(&update("dead"), now - 3_600_000).unwrap();

        let purged = db.purge_stale_presence(1800).unwrap();
        assert_eq!(purged, 1);
        assert!(db.presence_of(&DeviceId::from("live")).unwrap().is_some());
        assert!(db.presence_of(&DeviceId::from("dead")).unwrap().is_none());
    }
}
