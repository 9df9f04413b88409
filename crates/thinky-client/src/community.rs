//! The community board, client side.
//!
//! Updates arrive over two independent triggers, the store's change stream
//! and a 30 s count-comparison poll, and both funnel into the same
//! idempotent [`CommunityChannel::reconcile`], which replaces the local
//! snapshot with the authoritative ordered page. Realtime delivery is a
//! latency optimization; the poll is the correctness backstop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use thinky_shared::constants::{
    COMMUNITY_PAGE_SIZE, MAX_COMMUNITY_MESSAGE_LEN, RECONCILE_POLL_SECS,
};
use thinky_shared::moderation::{self, ModerationVerdict};
use thinky_store::{ChangeEvent, CommunityMessage, NewCommunityMessage};

use crate::context::ClientSession;
use crate::error::{ClientError, Result};
use crate::notifications::{preview, NotificationKind};

/// What came of a post attempt. Moderation results are designed outcomes,
/// not errors.
#[derive(Debug, Clone)]
pub enum PostOutcome {
    /// The message passed moderation and was stored.
    Posted(CommunityMessage),
    /// The message hit the blocklist; a violation was recorded.
    Blocked(ModerationVerdict),
    /// The device is already banned. Nothing was written.
    Banned,
}

struct BoardState {
    messages: Vec<CommunityMessage>,
    known: HashSet<Uuid>,
    last_count: u64,
}

/// Client handle on the public anonymous board.
pub struct CommunityChannel {
    session: Arc<ClientSession>,
    state: Mutex<BoardState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CommunityChannel {
    pub fn new(session: Arc<ClientSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            state: Mutex::new(BoardState {
                messages: Vec::new(),
                known: HashSet::new(),
                last_count: 0,
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Post a message to the board.
    ///
    /// Validation happens before any store call. The ban status is
    /// re-fetched from the store on every attempt; a ban applied from
    /// another session must win over anything cached here.
    pub fn post(&self, text: &str) -> Result<PostOutcome> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let len = trimmed.chars().count();
        if len > MAX_COMMUNITY_MESSAGE_LEN {
            return Err(ClientError::MessageTooLong {
                len,
                max: MAX_COMMUNITY_MESSAGE_LEN,
            });
        }

        let profile = self.session.profile();
        let db = self.session.store();

        if db.ban_status(&profile.device_id)?.is_banned() {
            return Ok(PostOutcome::Banned);
        }

        if moderation::scan_for_violation(trimmed) {
            let outcome =
                db.record_violation(&profile.device_id, profile.username.0.as_str())?;
            return Ok(PostOutcome::Blocked(ModerationVerdict::from_outcome(
                outcome.new_count,
                outcome.is_now_banned,
            )));
        }

        let inserted = db.insert_community_message(&NewCommunityMessage {
            username: profile.username.to_string(),
            message: moderation::escape_html(trimmed),
            avatar_url: None,
            is_admin: false,
            mention_all: false,
        })?;

        // Keep the local snapshot in step without waiting for a trigger.
        let mut state = self.lock();
        if state.known.insert(inserted.id) {
            state.messages.push(inserted.clone());
            state.last_count += 1;
        }
        Ok(PostOutcome::Posted(inserted))
    }

    /// Fetch the authoritative ordered snapshot and replace local state.
    ///
    /// Idempotent: both triggers (poll and change stream) call this, and
    /// calling it twice in a row is a no-op the second time. Returns the
    /// messages that were new to this client; arrivals from other devices
    /// are offered to the notification queue.
    pub fn reconcile(&self) -> Result<Vec<CommunityMessage>> {
        let db = self.session.store();
        let snapshot = db.recent_community_messages(COMMUNITY_PAGE_SIZE)?;
        let count = db.community_message_count()?;

        let fresh: Vec<CommunityMessage> = {
            let mut state = self.lock();
            let fresh = snapshot
                .iter()
                .filter(|m| !state.known.contains(&m.id))
                .cloned()
                .collect();
            state.known = snapshot.iter().map(|m| m.id).collect();
            state.messages = snapshot;
            state.last_count = count;
            fresh
        };

        let own_username = self.session.profile().username.0.as_str();
        for message in &fresh {
            if message.username == own_username {
                continue;
            }
            self.session.dispatcher().offer(NotificationKind::Community {
                from: message.username.clone(),
                preview: preview(&message.message),
            });
        }
        Ok(fresh)
    }

    /// Spawn the two update triggers. Idempotent; call [`Self::stop`] to
    /// tear them down.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }

        // Trigger 1: the count-comparison poll.
        let poller = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(RECONCILE_POLL_SECS));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let known = poller.lock().last_count;
                match poller.session.store().community_message_count() {
                    Ok(count) if count != known => {
                        if let Err(e) = poller.reconcile() {
                            tracing::warn!(error = %e, "board reconcile failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "board count poll failed"),
                }
            }
        }));

        // Trigger 2: the realtime change stream.
        let listener = Arc::clone(self);
        let mut changes = self.session.store().subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                let relevant = match changes.recv().await {
                    Ok(ChangeEvent::CommunityInserted(_))
                    | Ok(ChangeEvent::ReactionsUpdated { .. }) => true,
                    Ok(_) => false,
                    // Dropped events are exactly what reconciliation covers.
                    Err(RecvError::Lagged(_)) => true,
                    Err(RecvError::Closed) => break,
                };
                if relevant {
                    if let Err(e) = listener.reconcile() {
                        tracing::warn!(error = %e, "board reconcile failed");
                    }
                }
            }
        }));
    }

    /// Abort both triggers.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Toggle this device's reaction on a message. Last-write-wins between
    /// concurrent togglers, as the store contract documents.
    pub fn toggle_reaction(
        &self,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<thinky_store::ReactionMap> {
        let device = &self.session.profile().device_id;
        Ok(self
            .session
            .store()
            .toggle_reaction(message_id, emoji, device)?)
    }

    /// The current local snapshot, ascending by creation time.
    pub fn snapshot(&self) -> Vec<CommunityMessage> {
        self.lock().messages.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CommunityChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing;
    use thinky_shared::moderation::BanState;

    fn other_message(text: &str) -> NewCommunityMessage {
        NewCommunityMessage {
            username: "Otter-Teal".to_string(),
            message: text.to_string(),
            avatar_url: None,
            is_admin: false,
            mention_all: false,
        }
    }

    #[test]
    fn clean_post_is_escaped_and_ordered_last() {
        let (_dir, session) = testing::session();
        let board = CommunityChannel::new(session.clone());

        session
            .store()
            .insert_community_message(&other_message("earlier"))
            .unwrap();
        board.reconcile().unwrap();

        let outcome = board.post("<b>hello & welcome</b>").unwrap();
        let PostOutcome::Posted(posted) = outcome else {
            panic!("clean text should post");
        };
        assert_eq!(posted.message, "&lt;b&gt;hello &amp; welcome&lt;/b&gt;");
        assert!(posted.reactions.is_empty());

        let snapshot = board.snapshot();
        assert_eq!(snapshot.last().unwrap().id, posted.id);
    }

    #[test]
    fn empty_and_oversized_posts_fail_validation() {
        let (_dir, session) = testing::session();
        let board = CommunityChannel::new(session.clone());

        assert!(matches!(
            board.post("   "),
            Err(ClientError::EmptyMessage)
        ));
        assert!(matches!(
            board.post(&"x".repeat(501)),
            Err(ClientError::MessageTooLong { len: 501, max: 500 })
        ));
        assert_eq!(session.store().community_message_count().unwrap(), 0);
    }

    #[test]
    fn five_violations_ban_and_the_sixth_never_reaches_the_store() {
        let (_dir, session) = testing::session();
        let board = CommunityChannel::new(session.clone());

        for expected in 1..=4u32 {
            let outcome = board.post("free robux for everyone").unwrap();
            assert!(matches!(
                outcome,
                PostOutcome::Blocked(ModerationVerdict::Warned { new_count, .. })
                    if new_count == expected
            ));
        }

        let fifth = board.post("free robux again").unwrap();
        assert!(matches!(
            fifth,
            PostOutcome::Blocked(ModerationVerdict::Banned)
        ));

        // Sixth attempt: rejected on the ban re-check, no violation written.
        let sixth = board.post("perfectly clean text").unwrap();
        assert!(matches!(sixth, PostOutcome::Banned));

        let record = session
            .store()
            .ban_record(&session.profile().device_id)
            .unwrap()
            .unwrap();
        assert_eq!(record.violation_count, 5);
        assert!(record.is_banned);
        assert_eq!(session.store().community_message_count().unwrap(), 0);
    }

    #[test]
    fn stale_not_banned_cache_loses_to_the_store() {
        let (_dir, session) = testing::session();
        let board = CommunityChannel::new(session.clone());

        // Ban applied "from another session": straight into the store.
        for _ in 0..5 {
            session
                .store()
                .record_violation(&session.profile().device_id, "Falcon-Crimson")
                .unwrap();
        }
        assert_eq!(
            session
                .store()
                .ban_status(&session.profile().device_id)
                .unwrap(),
            BanState::Banned
        );

        assert!(matches!(
            board.post("hello everyone").unwrap(),
            PostOutcome::Banned
        ));
    }

    #[test]
    fn reconcile_is_idempotent_and_notifies_arrivals() {
        let (_dir, session) = testing::session();
        let board = CommunityChannel::new(session.clone());

        session
            .store()
            .insert_community_message(&other_message("hi from elsewhere"))
            .unwrap();

        let fresh = board.reconcile().unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(session.dispatcher().visible().len(), 1);

        // Second pass over the same state changes nothing.
        let fresh = board.reconcile().unwrap();
        assert!(fresh.is_empty());
        assert_eq!(session.dispatcher().visible().len(), 1);
    }

    #[test]
    fn arrivals_while_board_is_active_are_not_popped_up() {
        let (_dir, session) = testing::session();
        let board = CommunityChannel::new(session.clone());
        session.set_active_view(crate::context::ActiveView::Community);

        session
            .store()
            .insert_community_message(&other_message("seen inline"))
            .unwrap();

        let fresh = board.reconcile().unwrap();
        assert_eq!(fresh.len(), 1);
        assert!(session.dispatcher().visible().is_empty());
    }

    #[test]
    fn own_posts_do_not_notify() {
        let (_dir, session) = testing::session();
        let board = CommunityChannel::new(session.clone());

        board.post("hello everyone").unwrap();
        board.reconcile().unwrap();
        assert!(session.dispatcher().visible().is_empty());
    }

    #[tokio::test]
    async fn start_and_stop_are_clean() {
        let (_dir, session) = testing::session();
        let board = CommunityChannel::new(session);
        board.start();
        board.start(); // second call is a no-op
        board.stop();
    }
}
