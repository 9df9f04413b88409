/// Application name
pub const APP_NAME: &str = "Thinky";

/// Violations before a device is permanently banned
pub const BAN_THRESHOLD: u32 = 5;

/// Maximum community message length in characters
pub const MAX_COMMUNITY_MESSAGE_LEN: usize = 500;

/// Maximum direct message length in characters
pub const MAX_DIRECT_MESSAGE_LEN: usize = 1000;

/// Page size for the community board snapshot
pub const COMMUNITY_PAGE_SIZE: u32 = 100;

/// Presence heartbeat interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Reconciling poll interval for the community board in seconds
pub const RECONCILE_POLL_SECS: u64 = 30;

/// Staleness window for the "devices available to message" list (seconds)
pub const PRESENCE_WINDOW_ACTIVE_SECS: i64 = 15;

/// Staleness window for the general online-count badge (seconds)
pub const PRESENCE_WINDOW_ONLINE_SECS: i64 = 60;

/// Staleness window for admin broadcast targeting (seconds)
pub const PRESENCE_WINDOW_BROADCAST_SECS: i64 = 300;

/// Staleness window governing direct-message deliverability (seconds)
pub const DM_DELIVERABLE_WINDOW_SECS: i64 = PRESENCE_WINDOW_ONLINE_SECS;

/// Maximum direct messages a sender may issue per rate-limit window
pub const DM_RATE_LIMIT_MAX: u32 = 5;

/// Trailing rate-limit window for direct sends (seconds)
pub const DM_RATE_LIMIT_WINDOW_SECS: i64 = 10;

/// Maximum simultaneously visible notification popups
pub const MAX_VISIBLE_NOTIFICATIONS: usize = 3;

/// Seconds a notification stays visible before auto-dismissal
pub const NOTIFICATION_DISMISS_SECS: u64 = 5;

/// Hex characters kept from the fingerprint hash
pub const DEVICE_ID_LEN: usize = 32;

/// Characters of the render-probe data URI fed into the fingerprint
pub const RENDER_PROBE_PREFIX_LEN: usize = 50;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
