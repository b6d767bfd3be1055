//! In-memory implementation of the repository traits.
//!
//! All state is held in `HashMap`s behind `RwLock`s and lost on restart.
//! Each operation takes the write lock for its whole read-modify-write, which
//! gives the same atomicity the SQLite backend gets from its connection lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use gatekeeper_core::{
    Answer, GuildConfig, GuildId, MessageId, Submission, Ticket, TicketKey, TicketNumber,
    TicketState, UserId,
};
use tokio::sync::RwLock;

use super::{
    CreateOutcome, GuildConfigRepository, QueueEntry, RepositoryError, TicketRepository,
};

pub struct InMemoryRepository {
    guilds: RwLock<HashMap<GuildId, GuildConfig>>,
    tickets: RwLock<HashMap<TicketKey, Ticket>>,
    queue: RwLock<HashMap<MessageId, QueueEntry>>,
    refuse_queue_watches: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            guilds: RwLock::new(HashMap::new()),
            tickets: RwLock::new(HashMap::new()),
            queue: RwLock::new(HashMap::new()),
            refuse_queue_watches: AtomicBool::new(false),
        }
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Insert a ticket record as-is, bypassing the active-ticket check.
    #[cfg(test)]
    pub async fn insert_raw(&self, ticket: Ticket) {
        self.tickets.write().await.insert(ticket.key, ticket);
    }

    /// Make every later `watch_queue_message` fail with a storage error.
    #[cfg(test)]
    pub fn refuse_queue_watches(&self) {
        self.refuse_queue_watches.store(true, Ordering::SeqCst);
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GuildConfigRepository for InMemoryRepository {
    async fn get_guild(&self, guild_id: GuildId) -> Result<Option<GuildConfig>, RepositoryError> {
        Ok(self.guilds.read().await.get(&guild_id).cloned())
    }

    async fn get_or_create_guild(&self, guild_id: GuildId) -> Result<GuildConfig, RepositoryError> {
        let mut guilds = self.guilds.write().await;
        Ok(guilds
            .entry(guild_id)
            .or_insert_with(|| GuildConfig::new(guild_id))
            .clone())
    }

    async fn put_guild(&self, config: &GuildConfig) -> Result<(), RepositoryError> {
        let mut guilds = self.guilds.write().await;
        let ticket_number = guilds
            .get(&config.guild_id)
            .map(|existing| existing.ticket_number)
            .unwrap_or(config.ticket_number);
        let mut stored = config.clone();
        stored.ticket_number = ticket_number;
        guilds.insert(config.guild_id, stored);
        Ok(())
    }

    async fn allocate_ticket_number(
        &self,
        guild_id: GuildId,
    ) -> Result<TicketNumber, RepositoryError> {
        let mut guilds = self.guilds.write().await;
        let config = guilds
            .entry(guild_id)
            .or_insert_with(|| GuildConfig::new(guild_id));
        config.ticket_number += 1;
        Ok(TicketNumber(config.ticket_number))
    }

    async fn list_guilds(&self) -> Result<Vec<GuildConfig>, RepositoryError> {
        let mut guilds: Vec<_> = self.guilds.read().await.values().cloned().collect();
        guilds.sort_by_key(|config| config.guild_id);
        Ok(guilds)
    }
}

#[async_trait]
impl TicketRepository for InMemoryRepository {
    async fn create_ticket(&self, ticket: &Ticket) -> Result<CreateOutcome, RepositoryError> {
        let mut tickets = self.tickets.write().await;
        let active = tickets.values().find(|existing| {
            existing.key.guild_id == ticket.key.guild_id
                && existing.key.user_id == ticket.key.user_id
                && existing.state.is_active()
        });
        if let Some(active) = active {
            return Ok(CreateOutcome::ActiveExists(active.clone()));
        }
        if tickets.contains_key(&ticket.key) {
            return Err(RepositoryError::storage(
                "create_ticket",
                format!("ticket {} already exists", ticket.key),
            ));
        }
        tickets.insert(ticket.key, ticket.clone());
        Ok(CreateOutcome::Created)
    }

    async fn get_ticket(&self, key: &TicketKey) -> Result<Option<Ticket>, RepositoryError> {
        Ok(self.tickets.read().await.get(key).cloned())
    }

    async fn latest_ticket(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<Ticket>, RepositoryError> {
        let tickets = self.tickets.read().await;
        Ok(tickets
            .values()
            .filter(|t| t.key.guild_id == guild_id && t.key.user_id == user_id)
            .max_by_key(|t| t.key.number)
            .cloned())
    }

    async fn record_progress(
        &self,
        key: &TicketKey,
        step: u32,
        answers: &BTreeMap<u32, Answer>,
    ) -> Result<bool, RepositoryError> {
        let mut tickets = self.tickets.write().await;
        match tickets.get_mut(key) {
            Some(ticket) if ticket.state == TicketState::Open => {
                ticket.step = step;
                ticket.answers = answers.clone();
                ticket.updated_at = Self::now_secs();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_set_state(
        &self,
        key: &TicketKey,
        from: TicketState,
        to: TicketState,
    ) -> Result<bool, RepositoryError> {
        let mut tickets = self.tickets.write().await;
        match tickets.get_mut(key) {
            Some(ticket) if ticket.state == from => {
                ticket.state = to;
                ticket.updated_at = Self::now_secs();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_submission(
        &self,
        key: &TicketKey,
        submission: &Submission,
    ) -> Result<(), RepositoryError> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets.get_mut(key).ok_or_else(|| {
            RepositoryError::storage("set_submission", format!("no ticket {}", key))
        })?;
        ticket.submission = Some(submission.clone());
        ticket.updated_at = Self::now_secs();
        Ok(())
    }

    async fn tickets_in_state(&self, state: TicketState) -> Result<Vec<Ticket>, RepositoryError> {
        let tickets = self.tickets.read().await;
        let mut found: Vec<_> = tickets
            .values()
            .filter(|t| t.state == state)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.key);
        Ok(found)
    }

    async fn all_tickets(&self) -> Result<Vec<Ticket>, RepositoryError> {
        let mut all: Vec<_> = self.tickets.read().await.values().cloned().collect();
        all.sort_by_key(|t| t.key);
        Ok(all)
    }

    async fn delete_malformed(&self) -> Result<usize, RepositoryError> {
        let mut tickets = self.tickets.write().await;
        let before = tickets.len();
        tickets.retain(|key, _| !key.is_malformed());
        Ok(before - tickets.len())
    }

    async fn watch_queue_message(&self, entry: QueueEntry) -> Result<(), RepositoryError> {
        if self.refuse_queue_watches.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage(
                "watch_queue_message",
                "queue watches are refused",
            ));
        }
        self.queue.write().await.insert(entry.message_id, entry);
        Ok(())
    }

    async fn watched_queue_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        Ok(self.queue.read().await.get(&message_id).copied())
    }

    async fn queue_messages_for_ticket(
        &self,
        ticket: &TicketKey,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        let mut entries: Vec<_> = self
            .queue
            .read()
            .await
            .values()
            .filter(|entry| entry.ticket == *ticket)
            .copied()
            .collect();
        entries.sort_by_key(|entry| entry.message_id);
        Ok(entries)
    }

    async fn claim_queue_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        Ok(self.queue.write().await.remove(&message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_core::{ChannelId, TicketKind};
    use std::sync::Arc;

    fn key(user: u64, number: u64) -> TicketKey {
        TicketKey::new(GuildId(1), UserId(user), TicketNumber(number))
    }

    fn open_ticket(user: u64, number: u64) -> Ticket {
        Ticket::open(key(user, number), TicketKind::Verification, 0)
    }

    #[tokio::test]
    async fn test_get_or_create_guild_persists_defaults() {
        let repo = InMemoryRepository::new();
        assert!(repo.get_guild(GuildId(1)).await.unwrap().is_none());
        let created = repo.get_or_create_guild(GuildId(1)).await.unwrap();
        assert_eq!(created.prefix, "!");
        assert!(repo.get_guild(GuildId(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_put_guild_keeps_counter() {
        let repo = InMemoryRepository::new();
        repo.allocate_ticket_number(GuildId(1)).await.unwrap();
        repo.allocate_ticket_number(GuildId(1)).await.unwrap();

        let mut config = GuildConfig::new(GuildId(1));
        config.admin_role = Some(gatekeeper_core::RoleId(5));
        repo.put_guild(&config).await.unwrap();

        let stored = repo.get_guild(GuildId(1)).await.unwrap().unwrap();
        assert_eq!(stored.ticket_number, 2);
        assert_eq!(stored.admin_role, Some(gatekeeper_core::RoleId(5)));
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_unique() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.allocate_ticket_number(GuildId(9)).await.unwrap()
            }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().0);
        }
        numbers.sort();
        assert_eq!(numbers, (1..=50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_create_refuses_second_active_ticket() {
        let repo = InMemoryRepository::new();
        assert_eq!(
            repo.create_ticket(&open_ticket(2, 1)).await.unwrap(),
            CreateOutcome::Created
        );
        match repo.create_ticket(&open_ticket(2, 2)).await.unwrap() {
            CreateOutcome::ActiveExists(existing) => assert_eq!(existing.key, key(2, 1)),
            other => panic!("expected ActiveExists, got {:?}", other),
        }

        // Once closed, a new ticket may be created.
        assert!(repo
            .compare_and_set_state(&key(2, 1), TicketState::Open, TicketState::Closed)
            .await
            .unwrap());
        assert_eq!(
            repo.create_ticket(&open_ticket(2, 2)).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            repo.latest_ticket(GuildId(1), UserId(2))
                .await
                .unwrap()
                .map(|t| t.key.number),
            Some(TicketNumber(2))
        );
    }

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_state() {
        let repo = InMemoryRepository::new();
        repo.create_ticket(&open_ticket(2, 1)).await.unwrap();
        assert!(!repo
            .compare_and_set_state(&key(2, 1), TicketState::Pending, TicketState::Verified)
            .await
            .unwrap());
        assert!(repo
            .compare_and_set_state(&key(2, 1), TicketState::Open, TicketState::Pending)
            .await
            .unwrap());
        assert!(!repo
            .compare_and_set_state(&key(2, 1), TicketState::Open, TicketState::Closed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_progress_only_recorded_while_open() {
        let repo = InMemoryRepository::new();
        repo.create_ticket(&open_ticket(2, 1)).await.unwrap();
        let mut answers = BTreeMap::new();
        answers.insert(0, Answer::Number(25));
        assert!(repo.record_progress(&key(2, 1), 1, &answers).await.unwrap());

        repo.compare_and_set_state(&key(2, 1), TicketState::Open, TicketState::Closed)
            .await
            .unwrap();
        assert!(!repo.record_progress(&key(2, 1), 2, &answers).await.unwrap());

        let ticket = repo.get_ticket(&key(2, 1)).await.unwrap().unwrap();
        assert_eq!(ticket.step, 1);
        assert_eq!(ticket.answers.get(&0), Some(&Answer::Number(25)));
    }

    #[tokio::test]
    async fn test_queue_message_claimed_once() {
        let repo = InMemoryRepository::new();
        let entry = QueueEntry {
            channel_id: ChannelId(3),
            message_id: MessageId(4),
            ticket: key(2, 1),
        };
        repo.watch_queue_message(entry).await.unwrap();
        assert_eq!(
            repo.watched_queue_message(MessageId(4)).await.unwrap(),
            Some(entry)
        );
        assert_eq!(
            repo.claim_queue_message(MessageId(4)).await.unwrap(),
            Some(entry)
        );
        assert_eq!(repo.claim_queue_message(MessageId(4)).await.unwrap(), None);
        assert_eq!(repo.watched_queue_message(MessageId(4)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_queue_messages_found_by_ticket() {
        let repo = InMemoryRepository::new();
        for (message, ticket) in [(4, key(2, 1)), (5, key(3, 1)), (6, key(2, 1))] {
            repo.watch_queue_message(QueueEntry {
                channel_id: ChannelId(3),
                message_id: MessageId(message),
                ticket,
            })
            .await
            .unwrap();
        }
        let found: Vec<_> = repo
            .queue_messages_for_ticket(&key(2, 1))
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.message_id)
            .collect();
        assert_eq!(found, vec![MessageId(4), MessageId(6)]);

        repo.refuse_queue_watches();
        assert!(repo
            .watch_queue_message(QueueEntry {
                channel_id: ChannelId(3),
                message_id: MessageId(7),
                ticket: key(2, 1),
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_malformed() {
        let repo = InMemoryRepository::new();
        repo.insert_raw(open_ticket(2, 1)).await;
        repo.insert_raw(Ticket::open(
            TicketKey::new(GuildId(0), UserId(2), TicketNumber(9)),
            TicketKind::Verification,
            0,
        ))
        .await;
        assert_eq!(repo.delete_malformed().await.unwrap(), 1);
        assert_eq!(repo.all_tickets().await.unwrap().len(), 1);
    }
}
