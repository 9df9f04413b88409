// Shared domain types for the Thinky anonymous community core:
// device identity, moderation, pseudonyms, payload normalization.

pub mod constants;
pub mod error;
pub mod identity;
pub mod moderation;
pub mod options;
pub mod types;

pub use error::IdentityError;
pub use identity::FingerprintSignals;
pub use moderation::{BanState, ModerationVerdict};
pub use types::{DeviceId, Pseudonym, SessionId};
