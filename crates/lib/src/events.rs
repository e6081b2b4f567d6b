//! Change notifications published by a surface: observers re-render from these
//! instead of polling the store.

use tokio::sync::broadcast;

use crate::completion::SessionState;
use crate::conversation::Message;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    StateChanged(SessionState),
    /// Running total of the in-flight response (only ever grows within one session).
    BufferUpdated(String),
    MessageAppended(Message),
    Cleared,
    /// A request failed; the text is user-facing.
    Failed(String),
}

pub type EventSender = broadcast::Sender<SurfaceEvent>;

pub fn channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}

/// Publish to current subscribers; having none is fine.
pub(crate) fn emit(tx: &EventSender, event: SurfaceEvent) {
    let _ = tx.send(event);
}
