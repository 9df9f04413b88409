//! Presence heartbeats, client side.
//!
//! A background task upserts this device's presence row every
//! [`HEARTBEAT_INTERVAL_SECS`]. Readers never look for row absence: liveness
//! is always a staleness-window comparison, because the unload-time cleanup
//! is best-effort only.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use thinky_shared::constants::{APP_NAME, HEARTBEAT_INTERVAL_SECS, PRESENCE_WINDOW_ACTIVE_SECS};
use thinky_store::{PresenceRow, PresenceUpdate};

use crate::context::{ActiveView, ClientSession};
use crate::error::Result;

/// Client handle on the presence registry.
pub struct PresenceTracker {
    session: Arc<ClientSession>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(session: Arc<ClientSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            task: Mutex::new(None),
        })
    }

    /// Upsert this device's row immediately.
    pub fn heartbeat_now(&self) -> Result<()> {
        self.session.store().heartbeat(&self.update())?;
        Ok(())
    }

    fn update(&self) -> PresenceUpdate {
        let profile = self.session.profile();
        let current_page = match self.session.active_view() {
            ActiveView::Background => "home",
            ActiveView::Community => "community",
            ActiveView::Conversation(_) => "messages",
        };

        PresenceUpdate {
            device_id: profile.device_id.clone(),
            device_name: std::env::var("HOSTNAME")
                .ok()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "Unknown Device".to_string()),
            browser: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
            os: std::env::consts::OS.to_string(),
            username: profile.username.to_string(),
            current_page: current_page.to_string(),
            is_admin: false,
        }
    }

    /// Spawn the heartbeat task. Failures are swallowed: a missed heartbeat
    /// only widens the staleness gap until the next tick.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.lock_task();
        if slot.is_some() {
            return;
        }

        let tracker = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                HEARTBEAT_INTERVAL_SECS,
            ));
            loop {
                ticker.tick().await;
                if let Err(e) = tracker.heartbeat_now() {
                    tracing::debug!(error = %e, "presence heartbeat failed");
                }
            }
        }));
    }

    /// Devices seen within the caller's chosen staleness window.
    pub fn online_count(&self, window_secs: i64) -> Result<u32> {
        Ok(self.session.store().online_count(window_secs)?)
    }

    /// Devices fresh enough to receive a direct message, excluding this one.
    /// Seeds the "active devices" conversation list.
    pub fn active_peers(&self) -> Result<Vec<PresenceRow>> {
        let own = &self.session.profile().device_id;
        let peers = self
            .session
            .store()
            .active_devices(PRESENCE_WINDOW_ACTIVE_SECS)?
            .into_iter()
            .filter(|row| &row.device_id != own)
            .collect();
        Ok(peers)
    }

    /// Stop the heartbeat task and best-effort delete the own row. A failed
    /// delete is harmless; the staleness window ages the row out anyway.
    pub fn shutdown(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
        let own = &self.session.profile().device_id;
        if let Err(e) = self.session.store().remove_presence(own) {
            tracing::debug!(error = %e, "presence cleanup failed");
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing;
    use thinky_shared::types::DeviceId;

    fn peer_row(id: &str) -> PresenceUpdate {
        PresenceUpdate {
            device_id: DeviceId::from(id),
            device_name: "Desktop".to_string(),
            browser: "thinky-client".to_string(),
            os: "linux".to_string(),
            username: "Otter-Teal".to_string(),
            current_page: "community".to_string(),
            is_admin: false,
        }
    }

    #[test]
    fn heartbeat_registers_the_device() {
        let (_dir, session) = testing::session();
        let tracker = PresenceTracker::new(session.clone());

        tracker.heartbeat_now().unwrap();
        assert_eq!(tracker.online_count(60).unwrap(), 1);

        let row = session
            .store()
            .presence_of(&session.profile().device_id)
            .unwrap()
            .unwrap();
        assert_eq!(row.username, "Falcon-Crimson");
        assert_eq!(row.current_page, "home");
    }

    #[test]
    fn heartbeat_tracks_the_active_view() {
        let (_dir, session) = testing::session();
        let tracker = PresenceTracker::new(session.clone());

        session.set_active_view(ActiveView::Community);
        tracker.heartbeat_now().unwrap();

        let row = session
            .store()
            .presence_of(&session.profile().device_id)
            .unwrap()
            .unwrap();
        assert_eq!(row.current_page, "community");
    }

    #[test]
    fn active_peers_excludes_self() {
        let (_dir, session) = testing::session();
        let tracker = PresenceTracker::new(session.clone());

        tracker.heartbeat_now().unwrap();
        session.store().heartbeat(&peer_row("dev-b")).unwrap();

        let peers = tracker.active_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].device_id.as_str(), "dev-b");
    }

    #[test]
    fn shutdown_removes_the_own_row() {
        let (_dir, session) = testing::session();
        let tracker = PresenceTracker::new(session.clone());

        tracker.heartbeat_now().unwrap();
        tracker.shutdown();

        assert!(session
            .store()
            .presence_of(&session.profile().device_id)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stoppable() {
        let (_dir, session) = testing::session();
        let tracker = PresenceTracker::new(session);
        tracker.start();
        tracker.start();
        tracker.shutdown();
    }
}
