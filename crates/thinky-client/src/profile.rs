//! Device profile persistence.
//!
//! The identity triple (device id, session id, pseudonym) is written as JSON
//! to two independent locations so that clearing one store does not reset the
//! identity. Storage failures degrade silently: the profile is still handed
//! out, it just will not survive the process. That is the documented
//! ephemeral mode.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use thinky_shared::identity::FingerprintSignals;
use thinky_shared::types::{DeviceId, Pseudonym, SessionId};
use thinky_shared::IdentityError;

/// The persisted anonymous identity of one browser-profile-equivalent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceProfile {
    pub device_id: DeviceId,
    pub session_id: SessionId,
    pub username: Pseudonym,
}

impl DeviceProfile {
    /// Build a fresh profile from the host's fingerprint signals.
    ///
    /// The device id is deterministic: recomputing it on the same machine
    /// yields the same id, which is what makes losing the stored copy cheap.
    fn fresh() -> Self {
        Self {
            device_id: DeviceId::derive(&FingerprintSignals::collect()),
            session_id: SessionId::generate(),
            username: Pseudonym::generate(),
        }
    }
}

/// Redundant two-file JSON persistence for [`DeviceProfile`].
pub struct ProfileStore {
    primary: PathBuf,
    fallback: PathBuf,
}

impl ProfileStore {
    /// Store backed by explicit paths. Used by tests and embedders.
    pub fn at(primary: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    /// Default platform locations: the data dir and the config dir, two
    /// directories a cleanup tool is unlikely to wipe together.
    pub fn default_paths() -> Option<Self> {
        let dirs = ProjectDirs::from("com", "thinky", "thinky")?;
        Some(Self::at(
            dirs.data_dir().join("profile.json"),
            dirs.config_dir().join("profile.json"),
        ))
    }

    /// Recover the profile from either copy, regenerating whatever is
    /// missing, and re-persist to both locations.
    pub fn load_or_create(&self) -> DeviceProfile {
        let profile = recover(&self.primary)
            .or_else(|| recover(&self.fallback))
            .unwrap_or_else(|| {
                tracing::info!("no stored profile, creating a fresh identity");
                DeviceProfile::fresh()
            });

        for path in [&self.primary, &self.fallback] {
            if let Err(e) = persist_profile(path, &profile) {
                tracing::debug!(path = %path.display(), error = %e, "profile persistence unavailable");
            }
        }
        profile
    }
}

fn recover(path: &Path) -> Option<DeviceProfile> {
    match read_profile(path) {
        Ok(profile) => Some(profile),
        // No copy yet is the normal first-run case.
        Err(IdentityError::StorageUnavailable(e))
            if e.kind() == std::io::ErrorKind::NotFound =>
        {
            None
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "ignoring unreadable profile copy");
            None
        }
    }
}

fn read_profile(path: &Path) -> Result<DeviceProfile, IdentityError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| IdentityError::CorruptProfile(e.to_string()))
}

fn persist_profile(path: &Path, profile: &DeviceProfile) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(profile)
        .map_err(|e| IdentityError::CorruptProfile(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}
