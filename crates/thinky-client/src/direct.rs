//! Pairwise direct messaging, client side.
//!
//! Two listeners share the table-wide insert stream and filter locally. The
//! conversation listener lives only while a conversation is open (at most
//! one at a time, torn down on `close` or when a new conversation opens)
//! and appends inserts for the open pair inline, flipping read immediately.
//! The notification listener runs for the whole session and turns inserts
//! for every other pair into unread-counter bumps and popup offers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use thinky_shared::constants::MAX_DIRECT_MESSAGE_LEN;
use thinky_shared::moderation::{self, ModerationVerdict};
use thinky_shared::types::DeviceId;
use thinky_store::{ChangeEvent, DirectMessage, StoreError};

use crate::context::{ActiveView, ClientSession};
use crate::error::{ClientError, Result};
use crate::notifications::{preview, NotificationKind};

/// How many history rows one conversation load pulls.
const CONVERSATION_PAGE: u32 = 50;

/// What came of a direct-message send attempt.
///
/// The last three variants mirror the store's designed send failures; each
/// maps to its own user-facing message.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Delivered and stored.
    Sent(DirectMessage),
    /// Blocklist hit; a violation was recorded.
    Blocked(ModerationVerdict),
    /// XSS/SQL pattern hit; rejected without counting a violation.
    SuspiciousContent,
    /// The sending device is banned.
    SenderBanned,
    /// The recipient has not heartbeated within the deliverability window.
    RecipientOffline,
    /// Too many sends in the trailing rate-limit window.
    RateLimited,
}

struct ConversationState {
    open_with: Option<DeviceId>,
    messages: Vec<DirectMessage>,
    unread: HashMap<DeviceId, u32>,
}

/// Client handle on device-to-device messaging.
pub struct DirectMessageChannel {
    session: Arc<ClientSession>,
    state: Mutex<ConversationState>,
    conversation_listener: Mutex<Option<JoinHandle<()>>>,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl DirectMessageChannel {
    pub fn new(session: Arc<ClientSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            state: Mutex::new(ConversationState {
                open_with: None,
                messages: Vec::new(),
                unread: HashMap::new(),
            }),
            conversation_listener: Mutex::new(None),
            notifier: Mutex::new(None),
        })
    }

    /// Spawn the session-long notification listener. Inserts addressed to
    /// this device that are not visible in the open conversation become
    /// unread bumps and popup offers. Idempotent; [`Self::stop`] tears it
    /// down.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.lock_notifier();
        if slot.is_some() {
            return;
        }

        let channel = Arc::clone(self);
        let mut changes = self.session.store().subscribe();
        *slot = Some(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(ChangeEvent::DirectInserted(dm)) => channel.on_background_insert(dm),
                    Ok(_) => {}
                    // A dropped popup is tolerable; unread counters are
                    // re-pulled from the store via refresh_unread().
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "direct-message stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Abort the notification listener.
    pub fn stop(&self) {
        if let Some(task) = self.lock_notifier().take() {
            task.abort();
        }
    }

    /// Open a conversation with `target`: load history, mark incoming
    /// messages read, and switch the single conversation subscription to
    /// this pair.
    pub fn open(self: &Arc<Self>, target: &DeviceId) -> Result<Vec<DirectMessage>> {
        self.close();

        let me = self.session.profile().device_id.clone();
        let db = self.session.store();

        let history = db.conversation(&me, target, CONVERSATION_PAGE, 0)?;
        db.mark_conversation_read(target, &me)?;

        {
            let mut state = self.lock();
            state.open_with = Some(target.clone());
            state.messages = history.clone();
            state.unread.remove(target);
        }
        self.session
            .set_active_view(ActiveView::Conversation(target.clone()));

        let channel = Arc::clone(self);
        let mut changes = self.session.store().subscribe();
        *self.lock_conversation_listener() = Some(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(ChangeEvent::DirectInserted(dm)) => channel.on_conversation_insert(dm),
                    Ok(_) => {}
                    // Dropped events surface on the next open(), which
                    // reloads history wholesale.
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "conversation stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        tracing::debug!(peer = %target.short(), "conversation opened");
        Ok(history)
    }

    /// Conversation-listener path: appends inserts for the open pair inline
    /// and flips their read flag, ignores everything else.
    fn on_conversation_insert(&self, dm: DirectMessage) {
        let me = &self.session.profile().device_id;

        let mut state = self.lock();
        let pair_open = state.open_with.as_ref().is_some_and(|peer| {
            (dm.from_device_id == *peer && dm.to_device_id == *me)
                || (dm.from_device_id == *me && dm.to_device_id == *peer)
        });
        if !pair_open {
            return;
        }

        if state.messages.iter().all(|m| m.id != dm.id) {
            state.messages.push(dm.clone());
        }
        drop(state);

        // Seen inline, so the read flag flips right away.
        if dm.to_device_id == *me {
            if let Err(e) = self
                .session
                .store()
                .mark_conversation_read(&dm.from_device_id, me)
            {
                tracing::debug!(error = %e, "mark-read failed");
            }
        }
    }

    /// Notification-listener path: inserts for the open pair are already on
    /// screen and skipped; every other incoming message bumps its sender's
    /// unread counter and is offered to the popup queue.
    fn on_background_insert(&self, dm: DirectMessage) {
        let me = &self.session.profile().device_id;
        if dm.to_device_id != *me {
            return;
        }

        let mut state = self.lock();
        if state
            .open_with
            .as_ref()
            .is_some_and(|peer| dm.from_device_id == *peer)
        {
            return;
        }

        *state.unread.entry(dm.from_device_id.clone()).or_insert(0) += 1;
        drop(state);

        let kind = if dm.from_device_id.is_admin_sender() {
            NotificationKind::System {
                text: preview(&dm.message),
            }
        } else {
            NotificationKind::Direct {
                from: dm.from_device_id.clone(),
                preview: preview(&dm.message),
            }
        };
        self.session.dispatcher().offer(kind);
    }

    /// Send a direct message to `target`.
    ///
    /// Validation and the content screens run before any store write; the
    /// store then applies its own ban / presence / rate checks atomically,
    /// and each designed rejection comes back as its own outcome.
    pub fn send(&self, target: &DeviceId, text: &str) -> Result<SendOutcome> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let len = trimmed.chars().count();
        if len > MAX_DIRECT_MESSAGE_LEN {
            return Err(ClientError::MessageTooLong {
                len,
                max: MAX_DIRECT_MESSAGE_LEN,
            });
        }

        if moderation::looks_suspicious(trimmed) {
            return Ok(SendOutcome::SuspiciousContent);
        }

        let profile = self.session.profile();
        let db = self.session.store();

        if db.ban_status(&profile.device_id)?.is_banned() {
            return Ok(SendOutcome::SenderBanned);
        }

        if moderation::scan_for_violation(trimmed) {
            let outcome =
                db.record_violation(&profile.device_id, profile.username.0.as_str())?;
            return Ok(SendOutcome::Blocked(ModerationVerdict::from_outcome(
                outcome.new_count,
                outcome.is_now_banned,
            )));
        }

        match db.send_direct_message(&profile.device_id, target, trimmed) {
            Ok(dm) => Ok(SendOutcome::Sent(dm)),
            Err(StoreError::SenderBanned) => Ok(SendOutcome::SenderBanned),
            Err(StoreError::RecipientOffline) => Ok(SendOutcome::RecipientOffline),
            Err(StoreError::RateLimited) => Ok(SendOutcome::RateLimited),
            Err(other) => Err(other.into()),
        }
    }

    /// Close the open conversation and tear down its subscription. The
    /// notification listener keeps running.
    pub fn close(&self) {
        if let Some(task) = self.lock_conversation_listener().take() {
            task.abort();
        }

        let mut state = self.lock();
        if state.open_with.take().is_some() {
            state.messages.clear();
            drop(state);
            self.session.set_active_view(ActiveView::Background);
        }
    }

    /// Re-pull unread counters from the store (used at session start).
    pub fn refresh_unread(&self) -> Result<()> {
        let me = &self.session.profile().device_id;
        let counts = self.session.store().unread_counts(me)?;
        self.lock().unread = counts;
        Ok(())
    }

    pub fn unread_from(&self, peer: &DeviceId) -> u32 {
        self.lock().unread.get(peer).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.lock().unread.values().sum()
    }

    /// Messages of the open conversation, ascending by creation time.
    pub fn messages(&self) -> Vec<DirectMessage> {
        self.lock().messages.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_conversation_listener(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.conversation_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_notifier(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.notifier.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DirectMessageChannel {
    fn drop(&mut self) {
        for slot in [&self.conversation_listener, &self.notifier] {
            if let Some(task) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
    }
}
