//! Routes incoming messages to whoever is waiting for them.
//!
//! The question engine parks on `wait_for(channel, author, timeout)`; the event
//! ingress calls `offer` for every message it receives. A message is delivered
//! to at most one waiter, and a waiter that times out is removed so a late
//! message falls through to normal command handling.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use gatekeeper_core::{ChannelId, UserId};
use tokio::sync::oneshot;
use tracing::debug;

use super::IncomingMessage;

type WaiterKey = (ChannelId, UserId);

struct Waiter {
    id: u64,
    sender: oneshot::Sender<IncomingMessage>,
}

#[derive(Default)]
struct Waiters {
    next_id: u64,
    by_key: HashMap<WaiterKey, Waiter>,
}

#[derive(Default)]
pub struct ReplyBroker {
    waiters: Mutex<Waiters>,
}

impl ReplyBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        // The map stays consistent even if a holder panicked mid-insert.
        self.waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for the next message from `author` in `channel`.
    ///
    /// A second waiter for the same key replaces the first, which then
    /// resolves to `None`.
    pub async fn wait_for(
        &self,
        channel: ChannelId,
        author: UserId,
        timeout: Duration,
    ) -> Option<IncomingMessage> {
        let key = (channel, author);
        let (sender, receiver) = oneshot::channel();
        let id = {
            let mut waiters = self.lock();
            let id = waiters.next_id;
            waiters.next_id += 1;
            if waiters.by_key.insert(key, Waiter { id, sender }).is_some() {
                debug!("Replaced an earlier waiter for {} in {}", author, channel);
            }
            id
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(message)) => Some(message),
            Ok(Err(_)) => None,
            Err(_) => {
                let mut waiters = self.lock();
                if waiters.by_key.get(&key).map(|w| w.id) == Some(id) {
                    waiters.by_key.remove(&key);
                }
                None
            }
        }
    }

    /// Hand `message` to the waiter for its channel and author, if any.
    /// Returns whether a waiter took it.
    pub fn offer(&self, message: &IncomingMessage) -> bool {
        let waiter = self
            .lock()
            .by_key
            .remove(&(message.channel_id, message.author.id));
        match waiter {
            Some(waiter) => waiter.sender.send(message.clone()).is_ok(),
            None => false,
        }
    }

    pub fn is_waiting(&self, channel: ChannelId, author: UserId) -> bool {
        self.lock().by_key.contains_key(&(channel, author))
    }
}
