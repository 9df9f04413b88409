use thiserror::Error;

use thinky_store::StoreError;

/// Errors surfaced by the client components.
///
/// Validation failures happen before any store call; moderation results and
/// the designed send rejections are NOT errors, they come back as outcome
/// enums so each gets its own user-facing message.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The message text is empty after trimming.
    #[error("Message is empty")]
    EmptyMessage,

    /// The message text exceeds the per-channel cap.
    #[error("Message too long: {len} chars (max {max})")]
    MessageTooLong { len: usize, max: usize },

    /// Underlying store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
