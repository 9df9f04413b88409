//! Change-notification stream.
//!
//! Stands in for the hosted store's realtime subscription: every insert and
//! reaction update is published on a broadcast channel. Delivery is
//! best-effort (a lagging receiver drops events), so consumers must treat
//! the stream as a hint and rely on periodic reconciliation for correctness.

use tokio::sync::broadcast;
use uuid::Uuid;

use thinky_shared::types::DeviceId;

use crate::models::{CommunityMessage, DirectMessage, ReactionMap};

/// Buffered events per subscriber before lag starts dropping the oldest.
pub const CHANGE_BUFFER: usize = 256;

/// A change observed on one of the message tables.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A community message was appended.
    CommunityInserted(CommunityMessage),
    /// A community message's reactions map was rewritten.
    ReactionsUpdated {
        message_id: Uuid,
        reactions: ReactionMap,
    },
    /// A direct message was inserted.
    DirectInserted(DirectMessage),
    /// All messages from `from` to `to` were marked read.
    ConversationRead { from: DeviceId, to: DeviceId },
}

impl crate::database::Database {
    /// Subscribe to table changes.
    ///
    /// Each receiver sees every event published after the call, subject to
    /// the [`CHANGE_BUFFER`] lag policy.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes().subscribe()
    }
}
