//! Ticket store: opens tickets and applies lifecycle events.
//!
//! Every state change goes through `apply`, which runs the pure transition
//! and then writes it with a compare-and-set. A concurrent writer that moved
//! the ticket first makes `apply` fail with `Conflict` instead of
//! overwriting its result.

use std::sync::Arc;

use chrono::Utc;
use gatekeeper_core::{GuildId, Ticket, TicketKey, TicketKind, TicketState, UserId};
use thiserror::Error;
use tracing::{info, warn};

use super::event::TicketEvent;
use super::repository::{CreateOutcome, Repository, RepositoryError};
use super::transition::{transition, TransitionError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of `TicketStore::open_ticket`.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    Opened(Ticket),
    /// The member already holds this active ticket.
    Blocked(Ticket),
}

#[derive(Clone)]
pub struct TicketStore {
    repo: Arc<dyn Repository>,
}

impl TicketStore {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Allocate the next ticket number for `guild_id` and build the key.
    pub async fn allocate_ticket(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<TicketKey, StoreError> {
        let number = self.repo.allocate_ticket_number(guild_id).await?;
        Ok(TicketKey::new(guild_id, user_id, number))
    }

    /// Open a new ticket unless the member already holds an active one.
    ///
    /// A blocked attempt still consumes a ticket number.
    pub async fn open_ticket(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        kind: TicketKind,
    ) -> Result<OpenOutcome, StoreError> {
        let key = self.allocate_ticket(guild_id, user_id).await?;
        let ticket = Ticket::open(key, kind, Utc::now().timestamp());

        match self.repo.create_ticket(&ticket).await? {
            CreateOutcome::Created => {
                info!("Ticket #{} opened for {} in {}", key.number, user_id, guild_id);
                Ok(OpenOutcome::Opened(ticket))
            }
            CreateOutcome::ActiveExists(existing) => {
                info!(
                    "Ticket #{} not opened: {} already holds #{} ({})",
                    key.number, user_id, existing.key.number, existing.state
                );
                Ok(OpenOutcome::Blocked(existing))
            }
        }
    }

    pub async fn get(&self, key: &TicketKey) -> Result<Option<Ticket>, StoreError> {
        Ok(self.repo.get_ticket(key).await?)
    }

    /// Apply `event` to the ticket, returning the state it moved to.
    pub async fn apply(
        &self,
        key: &TicketKey,
        event: TicketEvent,
    ) -> Result<TicketState, StoreError> {
        let ticket = self
            .repo
            .get_ticket(key)
            .await?
            .ok_or(TransitionError::Missing(*key))?;
        let from = ticket.state;
        let to = transition(from, event)?;

        if !self.repo.compare_and_set_state(key, from, to).await? {
            warn!("Ticket #{} moved while applying {}", key.number, event);
            return Err(TransitionError::Conflict { key: *key, event }.into());
        }

        info!(
            "Ticket #{} in {}: {} -> {} ({})",
            key.number, key.guild_id, from, to, event
        );
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::repository::{InMemoryRepository, TicketRepository};

    fn store() -> (TicketStore, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        (TicketStore::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn test_open_ticket_allocates_increasing_numbers() {
        let (store, _) = store();
        let OpenOutcome::Opened(first) = store
            .open_ticket(GuildId(10), UserId(7), TicketKind::Verification)
            .await
            .unwrap()
        else {
            panic!("expected a new ticket");
        };
        assert_eq!(first.state, TicketState::Open);

        let second = store
            .open_ticket(GuildId(10), UserId(8), TicketKind::Verification)
            .await
            .unwrap();
        match second {
            OpenOutcome::Opened(ticket) => assert!(ticket.key.number > first.key.number),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_ticket_blocked_by_active_ticket() {
        let (store, _) = store();
        let OpenOutcome::Opened(first) = store
            .open_ticket(GuildId(10), UserId(7), TicketKind::Verification)
            .await
            .unwrap()
        else {
            panic!("expected a new ticket");
        };

        let outcome = store
            .open_ticket(GuildId(10), UserId(7), TicketKind::Verification)
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::Blocked(first.clone()));

        // Another guild is unaffected.
        let elsewhere = store
            .open_ticket(GuildId(11), UserId(7), TicketKind::Verification)
            .await
            .unwrap();
        assert!(matches!(elsewhere, OpenOutcome::Opened(_)));

        // Once settled, a new ticket may be opened.
        store.apply(&first.key, TicketEvent::Abandoned).await.unwrap();
        let again = store
            .open_ticket(GuildId(10), UserId(7), TicketKind::Verification)
            .await
            .unwrap();
        assert!(matches!(again, OpenOutcome::Opened(_)));
    }

    #[tokio::test]
    async fn test_apply_walks_the_lifecycle() {
        let (store, repo) = store();
        let OpenOutcome::Opened(ticket) = store
            .open_ticket(GuildId(10), UserId(7), TicketKind::Verification)
            .await
            .unwrap()
        else {
            panic!("expected a new ticket");
        };

        assert_eq!(
            store
                .apply(&ticket.key, TicketEvent::QuestionnaireCompleted)
                .await
                .unwrap(),
            TicketState::Pending
        );
        assert_eq!(
            store.apply(&ticket.key, TicketEvent::Approved).await.unwrap(),
            TicketState::Verified
        );
        let stored = repo.get_ticket(&ticket.key).await.unwrap().unwrap();
        assert_eq!(stored.state, TicketState::Verified);

        let err = store
            .apply(&ticket.key, TicketEvent::Denied)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Transition(TransitionError::NotAllowed {
                from: TicketState::Verified,
                event: TicketEvent::Denied
            })
        );
    }

    #[tokio::test]
    async fn test_apply_to_missing_ticket() {
        let (store, _) = store();
        let key = TicketKey::new(GuildId(10), UserId(7), gatekeeper_core::TicketNumber(99));
        assert_eq!(
            store.apply(&key, TicketEvent::Approved).await.unwrap_err(),
            StoreError::Transition(TransitionError::Missing(key))
        );
    }

    #[tokio::test]
    async fn test_concurrent_moderation_has_one_winner() {
        let (store, _) = store();
        let OpenOutcome::Opened(ticket) = store
            .open_ticket(GuildId(10), UserId(7), TicketKind::Verification)
            .await
            .unwrap()
        else {
            panic!("expected a new ticket");
        };
        store
            .apply(&ticket.key, TicketEvent::QuestionnaireCompleted)
            .await
            .unwrap();

        let approve = store.apply(&ticket.key, TicketEvent::Approved);
        let deny = store.apply(&ticket.key, TicketEvent::Denied);
        let (approve, deny) = tokio::join!(approve, deny);
        assert_eq!(
            [approve.is_ok(), deny.is_ok()]
                .iter()
                .filter(|ok| **ok)
                .count(),
            1
        );
    }
}
