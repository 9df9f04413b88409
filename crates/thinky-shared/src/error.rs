use thiserror::Error;

/// Failures while reading or writing the persisted device profile.
///
/// These never reach the user: profile storage degrades silently to an
/// ephemeral identity, so callers log and move on.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Profile storage unavailable: {0}")]
    StorageUnavailable(#[from] std::io::Error),

    #[error("Corrupt profile record: {0}")]
    CorruptProfile(String),
}
