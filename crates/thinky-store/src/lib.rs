//! # thinky-store
//!
//! Persistence layer for the Thinky community core, backed by SQLite.
//!
//! The crate plays the role of the hosted backend store: typed CRUD helpers,
//! count queries, upserts keyed by device id, a broadcast change stream that
//! stands in for the realtime subscription, and the small atomic procedures
//! the clients are not allowed to reimplement (violation counting, the
//! rate-limited direct-message send, admin broadcast).

pub mod bans;
pub mod changes;
pub mod community;
pub mod database;
pub mod direct;
pub mod migrations;
pub mod models;
pub mod presence;
pub mod quizzes;

mod error;

pub use changes::ChangeEvent;
pub use database::Database;
pub use error::StoreError;
pub use models::*;
pub use quizzes::QuestionView;
