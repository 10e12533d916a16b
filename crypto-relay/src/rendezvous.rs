//! Session rendezvous store
//!
//! Store keeps at most one pending message per `(session, sender)` slot. Producer depositing into
//! an occupied slot waits until the slot is consumed. Consumer either takes a single message
//! ([`Rendezvous::wait_for_message`]) or waits until every expected sender deposited a message and
//! then drains the whole session at once ([`Rendezvous::wait_for_all`]).
//!
//! A [gated](Rendezvous::gated) store accepts deposits only into sessions explicitly opened and
//! not yet closed; anything else is dropped on arrival.
//!
//! All waits are cancel-safe: store is mutated only while the lock is held, so dropping a waiting
//! future (e.g. when surrounding task is aborted) never leaves a half-updated session behind.
//!
//! ## Example
//! ```rust
//! # use crypto_relay::rendezvous::Rendezvous;
//! # use crypto_relay::{Message, SessionId};
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let store = Rendezvous::new();
//! let session = SessionId::from("kx");
//! store.deposit(&session, "alice", Message::plain("42")).await;
//!
//! let (sender, msg) = store.wait_for_message(&session).await;
//! assert_eq!(sender, "alice");
//! assert_eq!(msg.plaintext, "42");
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

use crate::message::{Message, SessionId};

/// Messages deposited within one session, keyed by sender name
pub type SessionMsgs = BTreeMap<String, Message>;

/// Rendezvous store, see [module level docs](self)
#[derive(Debug, Default)]
pub struct Rendezvous {
    sessions: Mutex<Sessions>,
    changed: Notify,
}

#[derive(Debug, Default)]
struct Sessions {
    slots: HashMap<SessionId, SessionMsgs>,
    /// Sessions accepting deposits, `None` if every session does
    open: Option<HashSet<SessionId>>,
}

impl Sessions {
    fn accepts(&self, session: &SessionId) -> bool {
        self.open.as_ref().map_or(true, |open| open.contains(session))
    }
}

impl Rendezvous {
    /// Constructs an empty store accepting deposits into any session
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs an empty store accepting deposits only into [opened](Self::open) sessions
    pub fn gated() -> Self {
        Self {
            sessions: Mutex::new(Sessions {
                slots: HashMap::new(),
                open: Some(HashSet::new()),
            }),
            changed: Notify::new(),
        }
    }

    /// Starts accepting deposits into the session
    ///
    /// No-op for a store that isn't [gated](Self::gated).
    pub async fn open(&self, session: &SessionId) {
        if let Some(open) = &mut self.sessions.lock().await.open {
            open.insert(session.clone());
        }
    }

    /// Stops accepting deposits into the session and discards its pending messages
    ///
    /// Producers blocked on the session give up. Returns amount of discarded messages.
    pub async fn close(&self, session: &SessionId) -> usize {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            if let Some(open) = &mut sessions.open {
                open.remove(session);
            }
            sessions.slots.remove(session)
        };
        self.changed.notify_waiters();
        removed.map(|slots| slots.len()).unwrap_or(0)
    }

    /// Puts message into `(session, sender)` slot
    ///
    /// If slot is occupied, waits until the pending message is consumed. Returns `false` if the
    /// session doesn't accept deposits (or stopped accepting them while waiting), message is
    /// dropped then.
    pub async fn deposit(&self, session: &SessionId, sender: &str, msg: Message) -> bool {
        let mut warned = false;
        loop {
            let mut sessions = self.sessions.lock().await;
            if !sessions.accepts(session) {
                debug!(%session, sender, "session is closed, message dropped");
                return false;
            }
            let slots = sessions.slots.entry(session.clone()).or_default();
            if slots.contains_key(sender) {
                if !warned {
                    warn!(%session, sender, "slot is occupied, waiting for it to be consumed");
                    warned = true;
                }
                let notification = self.changed.notified();
                drop(sessions);
                notification.await;
                continue;
            }

            trace!(%session, sender, "message deposited");
            slots.insert(sender.to_owned(), msg);
            drop(sessions);
            self.changed.notify_waiters();
            return true;
        }
    }

    /// Takes any pending message of the session, waiting for one if none is pending
    ///
    /// Returns the message along with its sender name.
    pub async fn wait_for_message(&self, session: &SessionId) -> (String, Message) {
        loop {
            let mut sessions = self.sessions.lock().await;
            if let Some(taken) = take_first(&mut sessions.slots, session) {
                drop(sessions);
                self.changed.notify_waiters();
                return taken;
            }

            let notification = self.changed.notified();
            drop(sessions);
            notification.await;
        }
    }

    /// Takes a message deposited by `sender` within the session, waiting for it if needed
    pub async fn wait_for_message_from(&self, session: &SessionId, sender: &str) -> Message {
        loop {
            let mut sessions = self.sessions.lock().await;
            let taken = sessions
                .slots
                .get_mut(session)
                .and_then(|slots| slots.remove(sender));
            if let Some(msg) = taken {
                remove_if_empty(&mut sessions.slots, session);
                drop(sessions);
                self.changed.notify_waiters();
                return msg;
            }

            let notification = self.changed.notified();
            drop(sessions);
            notification.await;
        }
    }

    /// Barrier: waits until every sender in `expected` has a pending message, then drains the
    /// whole session
    ///
    /// Messages of senders outside of `expected` are drained too and included in the output.
    pub async fn wait_for_all(&self, session: &SessionId, expected: &BTreeSet<String>) -> SessionMsgs {
        loop {
            let mut sessions = self.sessions.lock().await;
            let complete = sessions
                .slots
                .get(session)
                .map(|slots| expected.iter().all(|sender| slots.contains_key(sender)))
                .unwrap_or(expected.is_empty());
            if complete {
                let msgs = sessions.slots.remove(session).unwrap_or_default();
                drop(sessions);
                trace!(%session, received = msgs.len(), "barrier passed");
                self.changed.notify_waiters();
                return msgs;
            }

            let notification = self.changed.notified();
            drop(sessions);
            notification.await;
        }
    }

    /// Drops every pending message of the session and wakes blocked producers
    ///
    /// Unlike [`close`](Self::close), the session keeps accepting deposits.
    pub async fn discard(&self, session: &SessionId) -> usize {
        let removed = self.sessions.lock().await.slots.remove(session);
        self.changed.notify_waiters();
        removed.map(|slots| slots.len()).unwrap_or(0)
    }

    /// Number of pending messages within the session
    pub async fn pending(&self, session: &SessionId) -> usize {
        self.sessions
            .lock()
            .await
            .slots
            .get(session)
            .map(|slots| slots.len())
            .unwrap_or(0)
    }
}

fn take_first(
    slots: &mut HashMap<SessionId, SessionMsgs>,
    session: &SessionId,
) -> Option<(String, Message)> {
    let session_slots = slots.get_mut(session)?;
    let sender = session_slots.keys().next()?.clone();
    let msg = session_slots.remove(&sender)?;
    remove_if_empty(slots, session);
    Some((sender, msg))
}

fn remove_if_empty(slots: &mut HashMap<SessionId, SessionMsgs>, session: &SessionId) {
    if slots.get(session).map(|s| s.is_empty()).unwrap_or(false) {
        slots.remove(session);
    }
}
