//! Violation counting and ban state.
//!
//! The increment is a single upsert statement evaluated inside SQLite, so
//! concurrent sessions can never under-count a device's violations; callers
//! always get the authoritative post-increment state back.

use chrono::{DateTime, Utc};
use rusqlite::params;

use thinky_shared::constants::BAN_THRESHOLD;
use thinky_shared::moderation::BanState;
use thinky_shared::types::DeviceId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{BanRecord, ViolationOutcome};

impl Database {
    /// Fetch the authoritative ban state for a device.
    ///
    /// A device with no row has never been flagged and is `Clean`. Callers
    /// must use this before every send attempt rather than caching the
    /// result; a ban applied from another session must win.
    pub fn ban_status(&self, device_id: &DeviceId) -> Result<BanState> {
        let row = self
            .conn()
            .query_row(
                "SELECT violation_count, is_banned FROM bans WHERE device_id = ?1",
                params![device_id.as_str()],
                |row| {
                    let count: u32 = row.get(0)?;
                    let banned: bool = row.get(1)?;
                    Ok((count, banned))
                },
            );

        match row {
            Ok((count, banned)) => Ok(BanState::from_record(count, banned)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(BanState::Clean),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Atomically count one violation against a device.
    ///
    /// Upsert + increment + threshold check happen in one statement; the
    /// returned state is what SQLite committed, never a client-side guess.
    /// Once `is_banned` is set it is never cleared here.
    pub fn record_violation(
        &self,
        device_id: &DeviceId,
        username: &str,
    ) -> Result<ViolationOutcome> {
        let now = Utc::now().to_rfc3339();

        let (new_count, is_now_banned) = self.conn().query_row(
            "INSERT INTO bans (device_id, username, violation_count, is_banned, updated_at)
             VALUES (?1, ?2, 1, CASE WHEN 1 >= ?3 THEN 1 ELSE 0 END, ?4)
             ON CONFLICT(device_id) DO UPDATE SET
                 violation_count = bans.violation_count + 1,
                 is_banned = CASE
                     WHEN bans.violation_count + 1 >= ?3 THEN 1
                     ELSE bans.is_banned
                 END,
                 username = excluded.username,
                 updated_at = excluded.updated_at
             RETURNING violation_count, is_banned",
            params![device_id.as_str(), username, BAN_THRESHOLD, now],
            |row| {
                let count: u32 = row.get(0)?;
                let banned: bool = row.get(1)?;
                Ok((count, banned))
            },
        )?;

        if is_now_banned {
            tracing::warn!(device = %device_id.short(), count = new_count, "device banned");
        } else {
            tracing::info!(device = %device_id.short(), count = new_count, "violation recorded");
        }

        Ok(ViolationOutcome {
            new_count,
            is_now_banned,
        })
    }

    /// Full ban record, if the device has ever been flagged.
    pub fn ban_record(&self, device_id: &DeviceId) -> Result<Option<BanRecord>> {
        let row = self.conn().query_row(
            "SELECT device_id, username, violation_count, is_banned, updated_at
             FROM bans WHERE device_id = ?1",
            params![device_id.as_str()],
            |row| {
                let device: String = row.get(0)?;
                let username: String = row.get(1)?;
                let count: u32 = row.get(2)?;
                let banned: bool = row.get(3)?;
                let ts: String = row.get(4)?;
                Ok((device, username, count, banned, ts))
            },
        );

        match row {
            Ok((device, username, count, banned, ts)) => {
                let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts)
                    .map(|dt| dt.with_timezone(&Utc))?;
                Ok(Some(BanRecord {
                    device_id: DeviceId(device),
                    username,
                    violation_count: count,
                    is_banned: banned,
                    updated_at,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn unknown_device_is_clean() {
        let (_dir, db) = open_db();
        let state = db.ban_status(&DeviceId::from("nobody")).unwrap();
        assert_eq!(state, BanState::Clean);
    }

    #[test]
    fn violations_accumulate_to_ban() {
        let (_dir, db) = open_db();
        let device = DeviceId::from("offender");

        for expected in 1..=4u32 {
            let outcome = db.record_violation(&device, "Falcon-Crimson").unwrap();
            assert_eq!(outcome.new_count, expected);
            assert!(!outcome.is_now_banned);
        }

        let fifth = db.record_violation(&device, "Falcon-Crimson").unwrap();
        assert_eq!(fifth.new_count, 5);
        assert!(fifth.is_now_banned);

        assert_eq!(db.ban_status(&device).unwrap(), BanState::Banned);
    }

    #[test]
    fn ban_never_reverts() {
        let (_dir, db) = open_db();
        let device = DeviceId::from("offender");

        for _ in 0..5 {
            db.record_violation(&device, "Otter-Teal").unwrap();
        }
        // Further violations keep counting but the flag stays set.
        let sixth = db.record_violation(&device, "Otter-Teal").unwrap();
        assert_eq!(sixth.new_count, 6);
        assert!(sixth.is_now_banned);
    }

    #[test]
    fn record_keeps_latest_username() {
        let (_dir, db) = open_db();
        let device = DeviceId::from("renamer");

        db.record_violation(&device, "Old-Name").unwrap();
        db.record_violation(&device, "New-Name").unwrap();

        let record = db.ban_record(&device).unwrap().unwrap();
        assert_eq!(record.username, "New-Name");
        assert_eq!(record.violation_count, 2);
    }
}
