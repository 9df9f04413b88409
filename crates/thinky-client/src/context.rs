//! Per-session owned context.
//!
//! One [`ClientSession`] is constructed per running client and passed to the
//! channel components by reference. It replaces the free-floating module
//! globals of a typical script client (current device, active view,
//! notification queue) with explicit ownership, so tests build fresh
//! sessions against temp stores.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thinky_shared::types::DeviceId;
use thinky_store::Database;

use crate::notifications::NotificationDispatcher;
use crate::profile::DeviceProfile;

/// Which surface the user is currently looking at.
///
/// Drives notification suppression and the `current_page` field of presence
/// heartbeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveView {
    /// No messaging surface visible (other page, hidden tab).
    Background,
    /// The community board is the active, visible view.
    Community,
    /// A direct conversation with this device is open.
    Conversation(DeviceId),
}

pub(crate) type ViewHandle = Arc<Mutex<ActiveView>>;

/// Central client-session state: identity, store handle, active view, and
/// the notification queue.
pub struct ClientSession {
    profile: DeviceProfile,
    db: Arc<Database>,
    view: ViewHandle,
    dispatcher: Arc<NotificationDispatcher>,
}

impl ClientSession {
    pub fn new(db: Arc<Database>, profile: DeviceProfile) -> Arc<Self> {
        let view: ViewHandle = Arc::new(Mutex::new(ActiveView::Background));
        let dispatcher = Arc::new(NotificationDispatcher::new(view.clone()));

        tracing::info!(
            device = %profile.device_id.short(),
            username = %profile.username,
            "client session started"
        );

        Arc::new(Self {
            profile,
            db,
            view,
            dispatcher,
        })
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn store(&self) -> &Database {
        &self.db
    }

    pub fn store_handle(&self) -> Arc<Database> {
        self.db.clone()
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn active_view(&self) -> ActiveView {
        self.lock_view().clone()
    }

    pub fn set_active_view(&self, view: ActiveView) {
        *self.lock_view() = view;
    }

    fn lock_view(&self) -> MutexGuard<'_, ActiveView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_background_view() {
        let (_dir, session) = testing::session();
        assert_eq!(session.active_view(), ActiveView::Background);
    }

    #[test]
    fn view_round_trips() {
        let (_dir, session) = testing::session();
        session.set_active_view(ActiveView::Community);
        assert_eq!(session.active_view(), ActiveView::Community);

        let peer = DeviceId::from("dev-b");
        session.set_active_view(ActiveView::Conversation(peer.clone()));
        assert_eq!(session.active_view(), ActiveView::Conversation(peer));
    }
}
