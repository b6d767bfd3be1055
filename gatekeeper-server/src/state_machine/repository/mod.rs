//! Repository abstraction for guild configuration and ticket persistence.
//!
//! The state machine, question engine and reaction dispatcher only ever talk
//! to storage through these traits. Two backends exist: an in-memory one for
//! tests and a SQLite one for production.
//!
//! Every mutation that participates in an invariant is atomic at this level:
//! ticket numbers come from an atomic increment, state changes are
//! compare-and-set, ticket creation refuses to create a second active ticket,
//! and claiming a queue message removes it in the same step.

mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::collections::BTreeMap;

use async_trait::async_trait;
use gatekeeper_core::{
    Answer, ChannelId, GuildConfig, GuildId, MessageId, Submission, Ticket, TicketKey,
    TicketNumber, TicketState, UserId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
    #[error("corrupt {what} in storage")]
    Corruption { what: &'static str },
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        RepositoryError::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        RepositoryError::Corruption { what }
    }
}

/// Result of trying to create a ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created,
    /// The member already holds an active ticket in this guild; nothing was written.
    ActiveExists(Ticket),
}

/// A moderation-queue post awaiting a moderator reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub ticket: TicketKey,
}

#[async_trait]
pub trait GuildConfigRepository: Send + Sync {
    async fn get_guild(&self, guild_id: GuildId) -> Result<Option<GuildConfig>, RepositoryError>;

    /// Get the config, creating and storing the defaults on first use.
    async fn get_or_create_guild(&self, guild_id: GuildId) -> Result<GuildConfig, RepositoryError>;

    /// Store a config document. The ticket counter is owned by
    /// `allocate_ticket_number` and is left untouched.
    async fn put_guild(&self, config: &GuildConfig) -> Result<(), RepositoryError>;

    /// Atomically increment and return the guild's ticket counter.
    async fn allocate_ticket_number(
        &self,
        guild_id: GuildId,
    ) -> Result<TicketNumber, RepositoryError>;

    async fn list_guilds(&self) -> Result<Vec<GuildConfig>, RepositoryError>;
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Insert a new ticket unless the member already has an active one.
    async fn create_ticket(&self, ticket: &Ticket) -> Result<CreateOutcome, RepositoryError>;

    async fn get_ticket(&self, key: &TicketKey) -> Result<Option<Ticket>, RepositoryError>;

    /// The member's highest-numbered ticket in the guild.
    async fn latest_ticket(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<Ticket>, RepositoryError>;

    /// Persist the step cursor and answers of an OPEN ticket.
    ///
    /// Returns `false` without writing when the ticket is gone or no longer OPEN.
    async fn record_progress(
        &self,
        key: &TicketKey,
        step: u32,
        answers: &BTreeMap<u32, Answer>,
    ) -> Result<bool, RepositoryError>;

    /// Move the ticket from `from` to `to` if it is currently in `from`.
    async fn compare_and_set_state(
        &self,
        key: &TicketKey,
        from: TicketState,
        to: TicketState,
    ) -> Result<bool, RepositoryError>;

    async fn set_submission(
        &self,
        key: &TicketKey,
        submission: &Submission,
    ) -> Result<(), RepositoryError>;

    async fn tickets_in_state(&self, state: TicketState) -> Result<Vec<Ticket>, RepositoryError>;

    async fn all_tickets(&self) -> Result<Vec<Ticket>, RepositoryError>;

    /// Delete records whose key lacks a guild or member. Returns how many went.
    async fn delete_malformed(&self) -> Result<usize, RepositoryError>;

    /// Start tracking a queue post for moderator reactions.
    async fn watch_queue_message(&self, entry: QueueEntry) -> Result<(), RepositoryError>;

    async fn watched_queue_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<QueueEntry>, RepositoryError>;

    /// Queue posts still watched for `ticket`.
    async fn queue_messages_for_ticket(
        &self,
        ticket: &TicketKey,
    ) -> Result<Vec<QueueEntry>, RepositoryError>;

    /// Remove a queue post from the watch set, returning it only to the
    /// single caller that removed it.
    async fn claim_queue_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<QueueEntry>, RepositoryError>;
}

/// Everything the service needs from storage.
pub trait Repository: GuildConfigRepository + TicketRepository {}

impl<T: GuildConfigRepository + TicketRepository> Repository for T {}
