//! Per-user reply leases.
//!
//! While a member is answering a questionnaire they hold a lease; a second
//! start for the same member is refused until the guard drops. Release is tied
//! to `Drop`, so every exit path out of a flow frees the member.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use gatekeeper_core::UserId;
use tracing::debug;

#[derive(Default)]
pub struct ReplyLeases {
    held: Mutex<HashSet<UserId>>,
}

impl ReplyLeases {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn held(&self) -> MutexGuard<'_, HashSet<UserId>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lease for `user`, or `None` if someone already holds it.
    pub fn try_acquire(self: &Arc<Self>, user: UserId) -> Option<LeaseGuard> {
        if !self.held().insert(user) {
            debug!("Reply lease for {} is already held", user);
            return None;
        }
        Some(LeaseGuard {
            leases: Arc::clone(self),
            user,
        })
    }

    pub fn is_held(&self, user: UserId) -> bool {
        self.held().contains(&user)
    }

    pub fn held_count(&self) -> usize {
        self.held().len()
    }
}

#[must_use = "the lease is released as soon as the guard is dropped"]
pub struct LeaseGuard {
    leases: Arc<ReplyLeases>,
    user: UserId,
}

impl LeaseGuard {
    pub fn user(&self) -> UserId {
        self.user
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.leases.held().remove(&self.user);
    }
}
