//! Client-side notification popup queue.
//!
//! At most [`MAX_VISIBLE_NOTIFICATIONS`] popups are visible at once;
//! further arrivals queue FIFO and are promoted as slots free up. A visible
//! popup auto-dismisses after [`NOTIFICATION_DISMISS_SECS`] unless the user
//! dismisses it first. Suppression happens at offer time: an event the user
//! is already looking at inline never becomes a popup.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use thinky_shared::constants::{MAX_VISIBLE_NOTIFICATIONS, NOTIFICATION_DISMISS_SECS};
use thinky_shared::types::DeviceId;

use crate::context::{ActiveView, ViewHandle};

/// What a popup is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// A new community message while the board is not the active view.
    Community { from: String, preview: String },
    /// A direct message for a conversation that is not currently open.
    Direct { from: DeviceId, preview: String },
    /// System events (admin broadcasts and the like). Never suppressed.
    System { text: String },
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Visible {
    notification: Notification,
    shown_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    visible: Vec<Visible>,
    queued: VecDeque<Notification>,
}

/// Bounded-concurrency popup queue with view-based suppression.
pub struct NotificationDispatcher {
    view: ViewHandle,
    inner: Mutex<Inner>,
}

impl NotificationDispatcher {
    pub(crate) fn new(view: ViewHandle) -> Self {
        Self {
            view,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Offer an event for display. Returns `false` when the suppression
    /// rules dropped it (the user already sees the content inline).
    pub fn offer(&self, kind: NotificationKind) -> bool {
        self.offer_at(kind, Utc::now())
    }

    /// [`Self::offer`] with an explicit clock, so tests drive time.
    pub fn offer_at(&self, kind: NotificationKind, now: DateTime<Utc>) -> bool {
        if self.suppressed(&kind) {
            tracing::debug!(?kind, "notification suppressed by active view");
            return false;
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            kind,
            created_at: now,
        };

        let mut inner = self.lock();
        if inner.visible.len() < MAX_VISIBLE_NOTIFICATIONS {
            inner.visible.push(Visible {
                notification,
                shown_at: now,
            });
        } else {
            inner.queued.push_back(notification);
        }
        true
    }

    fn suppressed(&self, kind: &NotificationKind) -> bool {
        let view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        match kind {
            NotificationKind::Community { .. } => *view == ActiveView::Community,
            NotificationKind::Direct { from, .. } => {
                matches!(&*view, ActiveView::Conversation(peer) if peer == from)
            }
            NotificationKind::System { .. } => false,
        }
    }

    /// Drop visible popups older than the dismiss window and promote queued
    /// entries into the freed slots. Returns how many expired.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = Duration::seconds(NOTIFICATION_DISMISS_SECS as i64);
        let mut inner = self.lock();
        let before = inner.visible.len();
        inner.visible.retain(|v| now - v.shown_at < ttl);
        let expired = before - inner.visible.len();
        Self::promote(&mut inner, now);
        expired
    }

    /// User-initiated dismissal. Always frees the slot immediately.
    pub fn dismiss(&self, id: Uuid) {
        self.dismiss_at(id, Utc::now());
    }

    pub fn dismiss_at(&self, id: Uuid, now: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.visible.retain(|v| v.notification.id != id);
        Self::promote(&mut inner, now);
    }

    fn promote(inner: &mut Inner, now: DateTime<Utc>) {
        while inner.visible.len() < MAX_VISIBLE_NOTIFICATIONS {
            let Some(next) = inner.queued.pop_front() else {
                break;
            };
            inner.visible.push(Visible {
                notification: next,
                shown_at: now,
            });
        }
    }

    pub fn visible(&self) -> Vec<Notification> {
        self.lock()
            .visible
            .iter()
            .map(|v| v.notification.clone())
            .collect()
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }

    /// Background task sweeping on wall-clock time.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                ticker.tick().await;
                dispatcher.sweep_expired(Utc::now());
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shorten message text for display in a popup.
pub(crate) fn preview(text: &str) -> String {
    const MAX: usize = 80;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher_with_view(view: ActiveView) -> (ViewHandle, NotificationDispatcher) {
        let handle: ViewHandle = Arc::new(Mutex::new(view));
        let dispatcher = NotificationDispatcher::new(handle.clone());
        (handle, dispatcher)
    }

    fn community(n: usize) -> NotificationKind {
        NotificationKind::Community {
            from: "Otter-Teal".to_string(),
            preview: format!("message {n}"),
        }
    }

    #[test]
    fn at_most_three_visible_rest_queue_fifo() {
        let (_view, dispatcher) = dispatcher_with_view(ActiveView::Background);
        let now = Utc::now();

        for n in 0..5 {
            assert!(dispatcher.offer_at(community(n), now));
        }

        assert_eq!(dispatcher.visible().len(), 3);
        assert_eq!(dispatcher.queued_len(), 2);

        // Dismissing the oldest promotes the first queued item.
        let first = dispatcher.visible()[0].id;
        dispatcher.dismiss_at(first, now);

        let visible = dispatcher.visible();
        assert_eq!(visible.len(), 3);
        assert_eq!(dispatcher.queued_len(), 1);
        assert!(matches!(
            &visible[2].kind,
            NotificationKind::Community { preview, .. } if preview == "message 3"
        ));
    }

    #[test]
    fn auto_dismiss_after_fixed_duration() {
        let (_view, dispatcher) = dispatcher_with_view(ActiveView::Background);
        let t0 = Utc::now();

        dispatcher.offer_at(community(0), t0);
        dispatcher.offer_at(community(1), t0 + Duration::seconds(3));

        // At t0+5s the first popup has lived exactly its window.
        let expired = dispatcher.sweep_expired(t0 + Duration::seconds(5));
        assert_eq!(expired, 1);
        assert_eq!(dispatcher.visible().len(), 1);

        let expired = dispatcher.sweep_expired(t0 + Duration::seconds(8));
        assert_eq!(expired, 1);
        assert!(dispatcher.visible().is_empty());
    }

    #[test]
    fn expiry_promotes_queued_items() {
        let (_view, dispatcher) = dispatcher_with_view(ActiveView::Background);
        let t0 = Utc::now();

        for n in 0..4 {
            dispatcher.offer_at(community(n), t0);
        }
        assert_eq!(dispatcher.queued_len(), 1);

        dispatcher.sweep_expired(t0 + Duration::seconds(5));
        let visible = dispatcher.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(dispatcher.queued_len(), 0);
        assert!(matches!(
            &visible[0].kind,
            NotificationKind::Community { preview, .. } if preview == "message 3"
        ));
    }

    #[test]
    fn community_popup_suppressed_on_community_view() {
        let (view, dispatcher) = dispatcher_with_view(ActiveView::Community);

        assert!(!dispatcher.offer(community(0)));
        assert!(dispatcher.visible().is_empty());

        *view.lock().unwrap() = ActiveView::Background;
        assert!(dispatcher.offer(community(1)));
    }

    #[test]
    fn direct_popup_suppressed_only_for_the_open_conversation() {
        let open_peer = DeviceId::from("dev-b");
        let (_view, dispatcher) =
            dispatcher_with_view(ActiveView::Conversation(open_peer.clone()));

        let from_open = NotificationKind::Direct {
            from: open_peer,
            preview: "hey".to_string(),
        };
        assert!(!dispatcher.offer(from_open));

        let from_other = NotificationKind::Direct {
            from: DeviceId::from("dev-c"),
            preview: "hey".to_string(),
        };
        assert!(dispatcher.offer(from_other));
    }

    #[test]
    fn system_popups_are_never_suppressed() {
        let (_view, dispatcher) = dispatcher_with_view(ActiveView::Community);
        assert!(dispatcher.offer(NotificationKind::System {
            text: "maintenance tonight".to_string(),
        }));
    }

    #[test]
    fn preview_truncates_long_text() {
        let long = "x".repeat(200);
        let short = preview(&long);
        assert_eq!(short.chars().count(), 81);
        assert!(short.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }
}
