use thiserror::Error;

/// Errors produced by the store layer.
///
/// The last three variants are designed outcomes of the direct-message send
/// procedure, not faults: callers surface each with its own user-facing
/// message instead of a generic failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON (de)serialization of a stored payload failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// The sending device is banned.
    #[error("Sender is banned")]
    SenderBanned,

    /// The recipient has not heartbeated within the deliverability window.
    #[error("Recipient is offline")]
    RecipientOffline,

    /// The sender exceeded the per-device send rate limit.
    #[error("Rate limit exceeded, try again shortly")]
    RateLimited,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
