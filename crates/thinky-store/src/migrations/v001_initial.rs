//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `bans`, `presence`, `community_messages`,
//! `direct_messages`, and `reviewer_questions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Bans (one row per device, counter only grows)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS bans (
    device_id       TEXT PRIMARY KEY NOT NULL,   -- fingerprint hash
    username        TEXT NOT NULL DEFAULT '',
    violation_count INTEGER NOT NULL DEFAULT 0,
    is_banned       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    updated_at      TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Presence (heartbeat rows keyed by device)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS presence (
    device_id    TEXT PRIMARY KEY NOT NULL,
    device_name  TEXT NOT NULL,
    browser      TEXT NOT NULL,
    os           TEXT NOT NULL,
    username     TEXT NOT NULL,
    current_page TEXT NOT NULL,
    last_seen    INTEGER NOT NULL,               -- unix epoch millis
    is_admin     INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_presence_last_seen ON presence(last_seen);

-- ----------------------------------------------------------------
-- Community messages (append-only; reactions rewritten in place)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS community_messages (
    id          TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    username    TEXT NOT NULL,
    message     TEXT NOT NULL,                   -- HTML-escaped at insert
    avatar_url  TEXT,
    is_admin    INTEGER NOT NULL DEFAULT 0,
    mention_all INTEGER NOT NULL DEFAULT 0,
    reactions   TEXT NOT NULL DEFAULT '{}',      -- JSON: emoji -> [device_id]
    created_at  TEXT NOT NULL                    -- ISO-8601
);

CREATE INDEX IF NOT EXISTS idx_community_created
    ON community_messages(created_at);

-- ----------------------------------------------------------------
-- Direct messages (immutable rows; is_read flips once)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS direct_messages (
    id             TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    from_device_id TEXT NOT NULL,
    to_device_id   TEXT NOT NULL,
    message        TEXT NOT NULL,
    is_read        INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL                 -- ISO-8601
);

CREATE INDEX IF NOT EXISTS idx_direct_pair
    ON direct_messages(from_device_id, to_device_id, created_at);
CREATE INDEX IF NOT EXISTS idx_direct_unread
    ON direct_messages(to_device_id, is_read);

-- ----------------------------------------------------------------
-- Reviewer questions (grading source; answers never leave the store
-- except through the grading procedure)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reviewer_questions (
    reviewer_id    TEXT NOT NULL,
    question_index INTEGER NOT NULL,
    kind           TEXT NOT NULL,                -- multiple_choice | text
    prompt         TEXT NOT NULL,
    options        TEXT NOT NULL DEFAULT 'null', -- loosely-typed JSON payload
    correct_answer TEXT NOT NULL DEFAULT '',
    points         INTEGER NOT NULL DEFAULT 1,

    PRIMARY KEY (reviewer_id, question_index)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
