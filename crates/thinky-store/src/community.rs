//! Community board storage.
//!
//! Messages are append-only. Reactions are a JSON map column rewritten whole
//! on every toggle: two togglers racing from different processes are
//! last-write-wins, which the product accepts rather than papering over.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use thinky_shared::types::DeviceId;

use crate::changes::ChangeEvent;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{CommunityMessage, NewCommunityMessage, ReactionMap};

impl Database {
    /// Append a message to the board and publish the insert event.
    ///
    /// The caller is responsible for validation and HTML escaping; the store
    /// persists the text verbatim.
    pub fn insert_community_message(
        &self,
        new: &NewCommunityMessage,
    ) -> Result<CommunityMessage> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        self.conn().execute(
            "INSERT INTO community_messages
                 (id, username, message, avatar_url, is_admin, mention_all, reactions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}', ?7)",
            params![
                id.to_string(),
                new.username,
                new.message,
                new.avatar_url,
                new.is_admin,
                new.mention_all,
                now.to_rfc3339(),
            ],
        )?;

        let message = CommunityMessage {
            id,
            username: new.username.clone(),
            message: new.message.clone(),
            avatar_url: new.avatar_url.clone(),
            is_admin: new.is_admin,
            mention_all: new.mention_all,
            reactions: ReactionMap::new(),
            created_at: now,
        };

        self.publish(ChangeEvent::CommunityInserted(message.clone()));
        Ok(message)
    }

    /// The authoritative ordered snapshot: the newest `limit` messages,
    /// returned ascending by creation time.
    pub fn recent_community_messages(&self, limit: u32) -> Result<Vec<CommunityMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, username, message, avatar_url, is_admin, mention_all,
                    reactions, created_at
             FROM community_messages
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], row_to_community)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Total number of messages on the board. Cheap divergence probe for the
    /// reconciling poll.
    pub fn community_message_count(&self) -> Result<u64> {
        let count: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM community_messages",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Fetch one message by id.
    pub fn community_message(&self, id: Uuid) -> Result<CommunityMessage> {
        self.conn()
            .query_row(
                "SELECT id, username, message, avatar_url, is_admin, mention_all,
                        reactions, created_at
                 FROM community_messages WHERE id = ?1",
                params![id.to_string()],
                row_to_community,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Toggle `(emoji, device_id)` on a message's reactions map.
    ///
    /// Read-modify-write over the whole map: the device id is added under the
    /// emoji if absent, removed if present, and an emptied emoji key is
    /// dropped. Toggling twice restores the original map. Concurrent togglers
    /// from separate processes are last-write-wins by contract.
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        emoji: &str,
        device_id: &DeviceId,
    ) -> Result<ReactionMap> {
        let current = self.community_message(message_id)?;
        let mut reactions = current.reactions;

        let entry = reactions.entry(emoji.to_string()).or_default();
        if let Some(pos) = entry.iter().position(|d| d == device_id) {
            entry.remove(pos);
        } else {
            entry.push(device_id.clone());
        }
        if reactions.get(emoji).is_some_and(|v| v.is_empty()) {
            reactions.remove(emoji);
        }

        let serialized = serde_json::to_string(&reactions)?;
        self.conn().execute(
            "UPDATE community_messages SET reactions = ?1 WHERE id = ?2",
            params![serialized, message_id.to_string()],
        )?;

        self.publish(ChangeEvent::ReactionsUpdated {
            message_id,
            reactions: reactions.clone(),
        });
        Ok(reactions)
    }
}

fn row_to_community(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommunityMessage> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let message: String = row.get(2)?;
    let avatar_url: Option<String> = row.get(3)?;
    let is_admin: bool = row.get(4)?;
    let mention_all: bool = row.get(5)?;
    let reactions_json: String = row.get(6)?;
    let ts_str: String = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let reactions: ReactionMap = serde_json::from_str(&reactions_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CommunityMessage {
        id,
        username,
        message,
        avatar_url,
        is_admin,
        mention_all,
        reactions,
        created_at,
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

    fn new_message(text: &str) -> NewCommunityMessage {
        NewCommunityMessage {
            username: "Falcon-Crimson".to_string(),
            message: text.to_string(),
            avatar_url: None,
            is_admin: false,
            mention_all: false,
        }
    }

    #[test]
    fn insert_and_load_ordered() {
        let (_dir, db) = open_db();
        db.insert_community_message(&new_message("first")).unwrap();
        db.insert_community_message(&new_message("second")).unwrap();
        db.insert_community_message(&new_message("third")).unwrap();

        let messages = db.recent_community_messages(100).unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(messages.iter().all(|m| m.reactions.is_empty()));
    }

    #[test]
    fn recent_keeps_newest_when_over_limit() {
        let (_dir, db) = open_db();
        for i in 0..5 {
            db.insert_community_message(&new_message(&format!("m{i}"))).unwrap();
        }

        let messages = db.recent_community_messages(3).unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn count_tracks_inserts() {
        let (_dir, db) = open_db();
        assert_eq!(db.community_message_count().unwrap(), 0);
        db.insert_community_message(&new_message("hello")).unwrap();
        assert_eq!(db.community_message_count().unwrap(), 1);
    }

    #[test]
    fn reaction_toggle_is_idempotent_over_two_calls() {
        let (_dir, db) = open_db();
        let msg = db.insert_community_message(&new_message("react to me")).unwrap();
        let device = DeviceId::from("dev-a");

        let after_add = db.toggle_reaction(msg.id, "👍", &device).unwrap();
        assert_eq!(after_add.get("👍").unwrap(), &vec![device.clone()]);

        let after_remove = db.toggle_reaction(msg.id, "👍", &device).unwrap();
        assert!(after_remove.is_empty());

        let stored = db.community_message(msg.id).unwrap();
        assert!(stored.reactions.is_empty());
    }

    #[test]
    fn emptied_emoji_key_is_dropped_others_kept() {
        let (_dir, db) = open_db();
        let msg = db.insert_community_message(&new_message("popular")).unwrap();
        let a = DeviceId::from("dev-a");
        let b = DeviceId::from("dev-b");

        db.toggle_reaction(msg.id, "👍", &a).unwrap();
        db.toggle_reaction(msg.id, "👍", &b).unwrap();
        db.toggle_reaction(msg.id, "🎉", &a).unwrap();
        let map = db.toggle_reaction(msg.id, "👍", &a).unwrap();

        assert_eq!(map.get("👍").unwrap(), &vec![b]);
        assert_eq!(map.get("🎉").unwrap(), &vec![a]);
    }

    #[test]
    fn toggle_on_missing_message_is_not_found() {
        let (_dir, db) = open_db();
        let err = db
            .toggle_reaction(Uuid::new_v4(), "👍", &DeviceId::from("dev-a"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
