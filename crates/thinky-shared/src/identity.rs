//! Anonymous device identity.
//!
//! A device is identified by a fingerprint hash derived from stable
//! machine/client signals. No login, no secret: the id is recoverable by any
//! process that can observe the same signals, and a user who clears every
//! local store simply becomes a new device. That tradeoff is deliberate:
//! the id deters abuse, it does not authenticate anyone.

use chrono::Utc;
use rand::Rng;

use crate::constants::{DEVICE_ID_LEN, RENDER_PROBE_PREFIX_LEN};
use crate::types::{DeviceId, Pseudonym, SessionId};

/// The deterministic signals folded into the device fingerprint.
///
/// Field order matters: [`DeviceId::derive`] concatenates them in declaration
/// order, so reordering fields changes every derived id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintSignals {
    /// Client identification string (user agent or app name/version).
    pub client: String,
    /// Preferred language / locale.
    pub language: String,
    /// Display color depth in bits.
    pub color_depth: u32,
    /// Display resolution, `WIDTHxHEIGHT`.
    pub resolution: String,
    /// Timezone offset from UTC in minutes.
    pub timezone_offset_minutes: i32,
    /// Whether a persistent local store is available.
    pub local_storage: bool,
    /// Whether a per-session store is available.
    pub session_storage: bool,
    /// Logical CPU count.
    pub cpu_count: usize,
    /// Leading characters of a deterministic render-probe data URI.
    /// Extra entropy only; an empty string is fine.
    pub render_probe_prefix: String,
}

impl FingerprintSignals {
    /// Gather signals from the host environment.
    ///
    /// Never fails: anything the environment does not expose falls back to a
    /// fixed default, which simply costs entropy.
    pub fn collect() -> Self {
        let client = format!(
            "{}/{} ({} {})",
            crate::constants::APP_NAME,
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH,
        );

        let language = std::env::var("LANG")
            .or_else(|_| std::env::var("LC_ALL"))
            .unwrap_or_else(|_| "en-US".to_string());

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let timezone_offset_minutes = chrono::Local::now().offset().local_minus_utc() / 60;

        Self {
            client,
            language,
            color_depth: 24,
            resolution: "1920x1080".to_string(),
            timezone_offset_minutes,
            local_storage: true,
            session_storage: true,
            cpu_count,
            render_probe_prefix: String::new(),
        }
    }

    fn concatenate(&self) -> String {
        let probe: String = self
            .render_probe_prefix
            .chars()
            .take(RENDER_PROBE_PREFIX_LEN)
            .collect();
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.client,
            self.language,
            self.color_depth,
            self.resolution,
            self.timezone_offset_minutes,
            self.local_storage,
            self.session_storage,
            self.cpu_count,
            probe,
        )
    }
}

impl DeviceId {
    /// Derive the device id from fingerprint signals.
    ///
    /// BLAKE3 over the concatenated signals, hex-encoded, truncated to
    /// [`DEVICE_ID_LEN`] characters. Equal signals always yield equal ids.
    pub fn derive(signals: &FingerprintSignals) -> Self {
        let hash = blake3::hash(signals.concatenate().as_bytes());
        let mut encoded = hex::encode(hash.as_bytes());
        encoded.truncate(DEVICE_ID_LEN);
        Self(encoded)
    }
}

impl SessionId {
    /// Generate a fresh session token: `session_<unix-millis>_<9 alnum>`.
    pub fn generate() -> Self {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..9)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(format!("session_{}_{}", Utc::now().timestamp_millis(), suffix))
    }
}

const ANIMALS: &[&str] = &[
    "Falcon", "Otter", "Panda", "Tiger", "Wolf", "Fox", "Owl", "Lynx", "Heron", "Badger",
    "Raven", "Dolphin", "Gecko", "Marten", "Puffin", "Ibis", "Koala", "Stoat", "Bison", "Crane",
];

const COLORS: &[&str] = &[
    "Crimson", "Amber", "Teal", "Indigo", "Olive", "Coral", "Slate", "Violet", "Copper", "Jade",
    "Maroon", "Azure", "Sienna", "Pearl", "Cobalt", "Rust",
];

impl Pseudonym {
    /// Pick a random Animal-Color pair, e.g. `Falcon-Crimson`.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let animal = ANIMALS[rng.gen_range(0..ANIMALS.len())];
        let color = COLORS[rng.gen_range(0..COLORS.len())];
        Self(format!("{animal}-{color}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> FingerprintSignals {
        FingerprintSignals {
            client: "Thinky/0.1.0 (linux x86_64)".to_string(),
            language: "en-US".to_string(),
            color_depth: 24,
            resolution: "1920x1080".to_string(),
            timezone_offset_minutes: -300,
            local_storage: true,
            session_storage: true,
            cpu_count: 8,
            render_probe_prefix: "data:image/png;base64,iVBORw0KGgo".to_string(),
        }
    }

    #[test]
    fn test_derivation_deterministic() {
        let a = DeviceId::derive(&signals());
        let b = DeviceId::derive(&signals());
        assert_eq!(a, b);
        assert_eq!(a.0.len(), DEVICE_ID_LEN);
    }

    #[test]
    fn test_derivation_sensitive_to_signals() {
        let mut other = signals();
        other.cpu_count = 4;
        assert_ne!(DeviceId::derive(&signals()), DeviceId::derive(&other));
    }

    #[test]
    fn test_probe_prefix_truncated() {
        let mut long = signals();
        long.render_probe_prefix = "x".repeat(500);
        let mut truncated = signals();
        truncated.render_probe_prefix = "x".repeat(RENDER_PROBE_PREFIX_LEN);
        assert_eq!(DeviceId::derive(&long), DeviceId::derive(&truncated));
    }

    #[test]
    fn test_collect_never_fails() {
        let signals = FingerprintSignals::collect();
        assert!(!signals.client.is_empty());
        assert!(signals.cpu_count >= 1);
    }

    #[test]
    fn test_session_id_format() {
        let id = SessionId::generate();
        let parts: Vec<&str> = id.as_str().splitn(3, '_').collect();
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn test_pseudonym_from_fixed_lists() {
        let name = Pseudonym::generate();
        let (animal, color) = name.0.split_once('-').expect("Animal-Color shape");
        assert!(ANIMALS.contains(&animal));
        assert!(COLORS.contains(&color));
    }
}
