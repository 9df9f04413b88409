//! Pairwise device-to-device messages.
//!
//! Rows are only ever created through [`Database::send_direct_message`], the
//! moderated server-side path: it re-checks the sender's ban row, requires the
//! recipient to have heartbeated within the deliverability window, and
//! enforces a trailing-window rate limit, all before the insert, so an
//! undeliverable message is rejected at write time instead of after the fact.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use uuid::Uuid;

use thinky_shared::constants::{
    DM_DELIVERABLE_WINDOW_SECS, DM_RATE_LIMIT_MAX, DM_RATE_LIMIT_WINDOW_SECS,
};
use thinky_shared::types::DeviceId;

use crate::changes::ChangeEvent;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::DirectMessage;

impl Database {
    /// The moderated direct-message send procedure.
    ///
    /// All checks and the insert run under one connection guard:
    /// 1. the sender's ban row is re-read (a ban from another session wins),
    /// 2. the recipient must be present within
    ///    [`DM_DELIVERABLE_WINDOW_SECS`],
    /// 3. the sender must be under [`DM_RATE_LIMIT_MAX`] sends in the
    ///    trailing [`DM_RATE_LIMIT_WINDOW_SECS`].
    ///
    /// Each failure is its own variant so the UI can say "rate limited"
    /// rather than "something went wrong".
    pub fn send_direct_message(
        &self,
        from: &DeviceId,
        to: &DeviceId,
        message: &str,
    ) -> Result<DirectMessage> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let dm = {
            let conn = self.conn();

            let banned = match conn.query_row(
                "SELECT is_banned FROM bans WHERE device_id = ?1",
                params![from.as_str()],
                |row| row.get::<_, bool>(0),
            ) {
                Ok(b) => b,
                Err(rusqlite::Error::QueryReturnedNoRows) => false,
                Err(other) => return Err(StoreError::Sqlite(other)),
            };
            if banned {
                return Err(StoreError::SenderBanned);
            }

            let cutoff = now.timestamp_millis() - DM_DELIVERABLE_WINDOW_SECS * 1000;
            let present: u32 = conn.query_row(
                "SELECT COUNT(*) FROM presence WHERE device_id = ?1 AND last_seen >= ?2",
                params![to.as_str(), cutoff],
                |row| row.get(0),
            )?;
            if present == 0 {
                return Err(StoreError::RecipientOffline);
            }

            let window_start =
                (now - Duration::seconds(DM_RATE_LIMIT_WINDOW_SECS)).to_rfc3339();
            let recent: u32 = conn.query_row(
                "SELECT COUNT(*) FROM direct_messages
                 WHERE from_device_id = ?1 AND created_at >= ?2",
                params![from.as_str(), window_start],
                |row| row.get(0),
            )?;
            if recent >= DM_RATE_LIMIT_MAX {
                return Err(StoreError::RateLimited);
            }

            conn.execute(
                "INSERT INTO direct_messages
                     (id, from_device_id, to_device_id, message, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![
                    id.to_string(),
                    from.as_str(),
                    to.as_str(),
                    message,
                    now.to_rfc3339(),
                ],
            )?;

            DirectMessage {
                id,
                from_device_id: from.clone(),
                to_device_id: to.clone(),
                message: message.to_string(),
                is_read: false,
                created_at: now,
            }
        };

        tracing::debug!(from = %from.short(), to = %to.short(), "direct message sent");
        self.publish(ChangeEvent::DirectInserted(dm.clone()));
        Ok(dm)
    }

    /// Message history between two devices, either direction, the newest
    /// `limit` rows returned ascending by creation time.
    pub fn conversation(
        &self,
        a: &DeviceId,
        b: &DeviceId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DirectMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, from_device_id, to_device_id, message, is_read, created_at
             FROM direct_messages
             WHERE (from_device_id = ?1 AND to_device_id = ?2)
                OR (from_device_id = ?2 AND to_device_id = ?1)
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let rows = stmt.query_map(
            params![a.as_str(), b.as_str(), limit, offset],
            row_to_direct,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Flip `is_read` on every unread message from `from` to `to`.
    ///
    /// Called when the recipient opens the conversation. Returns how many
    /// rows were flipped.
    pub fn mark_conversation_read(&self, from: &DeviceId, to: &DeviceId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE direct_messages SET is_read = 1
             WHERE from_device_id = ?1 AND to_device_id = ?2 AND is_read = 0",
            params![from.as_str(), to.as_str()],
        )?;

        if affected > 0 {
            self.publish(ChangeEvent::ConversationRead {
                from: from.clone(),
                to: to.clone(),
            });
        }
        Ok(affected)
    }

    /// Unread message counts for a recipient, keyed by sender.
    pub fn unread_counts(&self, to: &DeviceId) -> Result<HashMap<DeviceId, u32>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT from_device_id, COUNT(*) FROM direct_messages
             WHERE to_device_id = ?1 AND is_read = 0
             GROUP BY from_device_id",
        )?;

        let rows = stmt.query_map(params![to.as_str()], |row| {
            let from: String = row.get(0)?;
            let count: u32 = row.get(1)?;
            Ok((DeviceId(from), count))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (from, count) = row?;
            counts.insert(from, count);
        }
        Ok(counts)
    }

    /// Deliver a message from the reserved admin sender to every device seen
    /// within `window_secs`. Returns how many copies were inserted.
    ///
    /// The admin path skips the ban / presence / rate checks: targeting the
    /// window already guarantees deliverability, and the sender is not a
    /// device.
    pub fn admin_broadcast(&self, message: &str, window_secs: i64) -> Result<u32> {
        let now = Utc::now();
        let admin = DeviceId::from(DeviceId::ADMIN);
        let mut delivered = Vec::new();

        {
            let conn = self.conn();
            let cutoff = now.timestamp_millis() - window_secs * 1000;

            let mut stmt = conn.prepare(
                "SELECT device_id FROM presence WHERE last_seen >= ?1",
            )?;
            let targets = stmt
                .query_map(params![cutoff], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for target in targets {
                let dm = DirectMessage {
                    id: Uuid::new_v4(),
                    from_device_id: admin.clone(),
                    to_device_id: DeviceId(target),
                    message: message.to_string(),
                    is_read: false,
                    created_at: now,
                };
                conn.execute(
                    "INSERT INTO direct_messages
                         (id, from_device_id, to_device_id, message, is_read, created_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                    params![
                        dm.id.to_string(),
                        dm.from_device_id.as_str(),
                        dm.to_device_id.as_str(),
                        dm.message,
                        dm.created_at.to_rfc3339(),
                    ],
                )?;
                delivered.push(dm);
            }
        }

        let count = delivered.len() as u32;
        for dm in delivered {
            self.publish(ChangeEvent::DirectInserted(dm));
        }

        tracing::info!(recipients = count, "admin broadcast delivered");
        Ok(count)
    }
}

fn row_to_direct(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectMessage> {
    let id_str: String = row.get(0)?;
    let from: String = row.get(1)?;
    let to: String = row.get(2)?;
    let message: String = row.get(3)?;
    let is_read: bool = row.get(4)?;
    let ts_str: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(DirectMessage {
        id,
        from_device_id: DeviceId(from),
        to_device_id: DeviceId(to),
        message,
        is_read,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PresenceUpdate;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn bring_online(db: &Database, id: &str) {
        db.heartbeat(&PresenceUpdate {
            device_id: DeviceId::from(id),
            device_name: "Desktop".to_string(),
            browser: "thinky-client".to_string(),
            os: "linux".to_string(),
            username: "Otter-Teal".to_string(),
            current_page: "community".to_string(),
            is_admin: false,
        })
        .unwrap();
    }

    #[test]
    fn send_requires_recipient_presence() {
        let (_dir, db) = open_db();
        let a = DeviceId::from("dev-a");
        let b = DeviceId::from("dev-b");

        // B has never heartbeated at all.
        let err = db.send_direct_message(&a, &b, "hello?").unwrap_err();
        assert!(matches!(err, StoreError::RecipientOffline));
        assert!(db.conversation(&a, &b, 50, 0).unwrap().is_empty());
    }

    #[test]
    fn send_rejects_stale_recipient_without_insert() {
        let (_dir, db) = open_db();
        let a = DeviceId::from("dev-a");
        let b = DeviceId::from("dev-b");

        // B's last heartbeat is 20 minutes old.
        let stale = Utc::now().timestamp_millis() - 20 * 60 * 1000;
        db.heartbeat_at(
            &PresenceUpdate {
                device_id: b.clone(),
                device_name: "Desktop".to_string(),
                browser: "thinky-client".to_string(),
                os: "linux".to_string(),
                username: "Otter-Teal".to_string(),
                current_page: "community".to_string(),
                is_admin: false,
            },
            stale,
        )
        .unwrap();

        let err = db.send_direct_message(&a, &b, "anyone there?").unwrap_err();
        assert!(matches!(err, StoreError::RecipientOffline));
        assert!(db.conversation(&a, &b, 50, 0).unwrap().is_empty());
    }

    #[test]
    fn send_rejects_banned_sender() {
        let (_dir, db) = open_db();
        let a = DeviceId::from("dev-a");
        let b = DeviceId::from("dev-b");
        bring_online(&db, "dev-b");

        for _ in 0..5 {
            db.record_violation(&a, "Falcon-Crimson").unwrap();
        }

        let err = db.send_direct_message(&a, &b, "let me back in").unwrap_err();
        assert!(matches!(err, StoreError::SenderBanned));
    }

    #[test]
    fn rate_limit_trips_after_burst() {
        let (_dir, db) = open_db();
        let a = DeviceId::from("dev-a");
        let b = DeviceId::from("dev-b");
        bring_online(&db, "dev-b");

        for i in 0..DM_RATE_LIMIT_MAX {
            db.send_direct_message(&a, &b, &format!("msg {i}")).unwrap();
        }

        let err = db.send_direct_message(&a, &b, "one too many").unwrap_err();
        assert!(matches!(err, StoreError::RateLimited));

        // The other direction has its own budget.
        bring_online(&db, "dev-a");
        db.send_direct_message(&b, &a, "still fine").unwrap();
    }

    #[test]
    fn conversation_joins_both_directions_in_order() {
        let (_dir, db) = open_db();
        let a = DeviceId::from("dev-a");
        let b = DeviceId::from("dev-b");
        bring_online(&db, "dev-a");
        bring_online(&db, "dev-b");

        db.send_direct_message(&a, &b, "hi b").unwrap();
        db.send_direct_message(&b, &a, "hi a").unwrap();
        db.send_direct_message(&a, &b, "how's studying").unwrap();

        let convo = db.conversation(&a, &b, 50, 0).unwrap();
        let texts: Vec<&str> = convo.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["hi b", "hi a", "how's studying"]);

        // Symmetric from either side.
        assert_eq!(db.conversation(&b, &a, 50, 0).unwrap().len(), 3);
    }

    #[test]
    fn mark_read_flips_only_one_direction() {
        let (_dir, db) = open_db();
        let a = DeviceId::from("dev-a");
        let b = DeviceId::from("dev-b");
        bring_online(&db, "dev-a");
        bring_online(&db, "dev-b");

        db.send_direct_message(&a, &b, "one").unwrap();
        db.send_direct_message(&a, &b, "two").unwrap();
        db.send_direct_message(&b, &a, "reply").unwrap();

        assert_eq!(db.mark_conversation_read(&a, &b).unwrap(), 2);
        assert_eq!(db.mark_conversation_read(&a, &b).unwrap(), 0);

        let convo = db.conversation(&a, &b, 50, 0).unwrap();
        assert!(convo.iter().filter(|m| m.from_device_id == a).all(|m| m.is_read));
        assert!(convo.iter().filter(|m| m.from_device_id == b).all(|m| !m.is_read));
    }

    #[test]
    fn unread_counts_group_by_sender() {
        let (_dir, db) = open_db();
        let a = DeviceId::from("dev-a");
        let b = DeviceId::from("dev-b");
        let c = DeviceId::from("dev-c");
        bring_online(&db, "dev-c");

        db.send_direct_message(&a, &c, "from a").unwrap();
        db.send_direct_message(&b, &c, "from b 1").unwrap();
        db.send_direct_message(&b, &c, "from b 2").unwrap();

        let counts = db.unread_counts(&c).unwrap();
        assert_eq!(counts.get(&a), Some(&1));
        assert_eq!(counts.get(&b), Some(&2));

        db.mark_conversation_read(&b, &c).unwrap();
        let counts = db.unread_counts(&c).unwrap();
        assert_eq!(counts.get(&b), None);
    }

    #[test]
    fn broadcast_targets_only_the_wide_window() {
        let (_dir, db) = open_db();
        let now = Utc::now().timestamp_millis();
        let row = |id: &str| PresenceUpdate {
            device_id: DeviceId::from(id),
            device_name: "Desktop".to_string(),
            browser: "thinky-client".to_string(),
            os: "linux".to_string(),
            username: "Otter-Teal".to_string(),
            current_page: "community".to_string(),
            is_admin: false,
        };

        db.heartbeat_at(&row("seen-now"), now).unwrap();
        db.heartbeat_at(&row("seen-4min"), now - 240_000).unwrap();
        db.heartbeat_at(&row("seen-10min"), now - 600_000).unwrap();

        let delivered = db.admin_broadcast("maintenance tonight", 300).unwrap();
        assert_eq!(delivered, 2);

        let admin = DeviceId::from(DeviceId::ADMIN);
        let convo = db
            .conversation(&admin, &DeviceId::from("seen-4min"), 10, 0)
            .unwrap();
        assert_eq!(convo.len(), 1);
        assert!(convo[0].from_device_id.is_admin_sender());

        assert!(db
            .conversation(&admin, &DeviceId::from("seen-10min"), 10, 0)
            .unwrap()
            .is_empty());
    }
}
