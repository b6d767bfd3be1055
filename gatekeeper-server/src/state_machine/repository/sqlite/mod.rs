//! SQLite implementation of the repository traits.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Layout
//!
//! Guild configs and tickets are stored as JSON documents next to the
//! relational columns used for lookups and for the atomic operations:
//! `guild_configs.ticket_number` is the counter incremented in place, and
//! `tickets.state` is what compare-and-set checks. A partial unique index on
//! active states backs the one-active-ticket-per-member rule.
//!
//! When adding fields to the stored documents, use `#[serde(default)]` so
//! older rows still deserialize.


use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use gatekeeper_core::{
    Answer, ChannelId, GuildConfig, GuildId, MessageId, Submission, Ticket, TicketKey,
    TicketNumber, TicketState, UserId,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, warn};

use super::{
    CreateOutcome, GuildConfigRepository, QueueEntry, RepositoryError, TicketRepository,
};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// SQLite-backed repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime. The single connection behind a mutex
/// serializes every read-modify-write.
pub struct SqliteRepository {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist, and runs any
    /// pending migrations.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability (survives OS/power failure)
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // The database holds member ages and photo links.
        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite silently keeps DELETE mode on filesystems without shared
        // memory support, so check what we actually got.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS guild_configs (
                    guild_id TEXT PRIMARY KEY,
                    config_json TEXT NOT NULL,
                    ticket_number INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS tickets (
                    guild_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    ticket_number INTEGER NOT NULL,
                    state TEXT NOT NULL,
                    ticket_json TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (guild_id, user_id, ticket_number)
                );

                CREATE INDEX IF NOT EXISTS idx_tickets_state ON tickets(state);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_one_active_ticket
                    ON tickets(guild_id, user_id)
                    WHERE state IN ('OPEN', 'PENDING', 'PENDING_REDO');
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // Version 2: queue posts awaiting moderator reactions survive restarts.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS queue_messages (
                    message_id TEXT PRIMARY KEY,
                    channel_id TEXT NOT NULL,
                    guild_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    ticket_number INTEGER NOT NULL
                );
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn, operation)?;
            f(&conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

fn lock<'a>(
    conn: &'a Mutex<Connection>,
    operation: &'static str,
) -> Result<MutexGuard<'a, Connection>, RepositoryError> {
    conn.lock()
        .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Integer conversion helpers
// =============================================================================

/// Convert a ticket number to i64 for SQLite storage without silent overflow.
pub(super) fn ticket_number_to_i64(
    number: TicketNumber,
    operation: &'static str,
) -> Result<i64, RepositoryError> {
    i64::try_from(number.0).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!(
                "ticket number {} exceeds maximum storable value ({})",
                number.0,
                i64::MAX
            ),
        )
    })
}

/// Convert an i64 from SQLite back to a ticket number. Negative values mean
/// the row was written by something other than this code.
pub(super) fn i64_to_ticket_number(
    value: i64,
    operation: &'static str,
) -> Result<TicketNumber, RepositoryError> {
    u64::try_from(value).map(TicketNumber).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!("invalid negative ticket number {} in database", value),
        )
    })
}

fn parse_id<T: std::str::FromStr>(value: &str, what: &'static str) -> Result<T, RepositoryError> {
    value.parse().map_err(|_| RepositoryError::corruption(what))
}

fn decode_ticket(json: &str) -> Result<Ticket, RepositoryError> {
    serde_json::from_str(json).map_err(|_| RepositoryError::corruption("ticket JSON"))
}

fn decode_config(json: &str, ticket_number: i64) -> Result<GuildConfig, RepositoryError> {
    let mut config: GuildConfig = serde_json::from_str(json)
        .map_err(|_| RepositoryError::corruption("guild config JSON"))?;
    config.ticket_number = i64_to_ticket_number(ticket_number, "decode guild config")?.0;
    Ok(config)
}

fn query_tickets(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Ticket>, RepositoryError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

    // A corrupt row must not stop reconciliation or the status page from
    // seeing every other ticket.
    let mut tickets = Vec::new();
    for row in rows {
        let (guild, user, number, json) = match row {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to read ticket row from SQLite in {}: {}", operation, e);
                continue;
            }
        };
        match decode_ticket(&json) {
            Ok(ticket) => tickets.push(ticket),
            Err(e) => warn!(
                "Skipping corrupt ticket {}/{}#{} in {}: {}",
                guild, user, number, operation, e
            ),
        }
    }
    Ok(tickets)
}

/// Rewrite a ticket row from its document, keeping the indexed columns in step.
fn write_ticket(
    conn: &Connection,
    ticket: &Ticket,
    operation: &'static str,
) -> Result<(), RepositoryError> {
    let json = serde_json::to_string(ticket)
        .map_err(|e| RepositoryError::storage("serialize ticket", e.to_string()))?;
    conn.execute(
        "UPDATE tickets SET state = ?4, ticket_json = ?5, updated_at = ?6
         WHERE guild_id = ?1 AND user_id = ?2 AND ticket_number = ?3",
        params![
            ticket.key.guild_id.to_string(),
            ticket.key.user_id.to_string(),
            ticket_number_to_i64(ticket.key.number, operation)?,
            ticket.state.as_str(),
            json,
            ticket.updated_at,
        ],
    )
    .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    Ok(())
}

fn read_ticket(
    conn: &Connection,
    key: &TicketKey,
    operation: &'static str,
) -> Result<Option<Ticket>, RepositoryError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT ticket_json FROM tickets
             WHERE guild_id = ?1 AND user_id = ?2 AND ticket_number = ?3",
            params![
                key.guild_id.to_string(),
                key.user_id.to_string(),
                ticket_number_to_i64(key.number, operation)?
            ],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
    json.as_deref().map(decode_ticket).transpose()
}

fn read_queue_entry(
    conn: &Connection,
    message_id: MessageId,
    operation: &'static str,
) -> Result<Option<QueueEntry>, RepositoryError> {
    let row: Option<(String, String, String, i64)> = conn
        .query_row(
            "SELECT channel_id, guild_id, user_id, ticket_number FROM queue_messages
             WHERE message_id = ?1",
            params![message_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

    row.map(|(channel, guild, user, number)| {
        Ok(QueueEntry {
            channel_id: parse_id::<ChannelId>(&channel, "queue channel id")?,
            message_id,
            ticket: TicketKey::new(
                parse_id::<GuildId>(&guild, "queue guild id")?,
                parse_id::<UserId>(&user, "queue user id")?,
                i64_to_ticket_number(number, operation)?,
            ),
        })
    })
    .transpose()
}

// =============================================================================
// GuildConfigRepository
// =============================================================================

#[async_trait]
impl GuildConfigRepository for SqliteRepository {
    async fn get_guild(&self, guild_id: GuildId) -> Result<Option<GuildConfig>, RepositoryError> {
        self.with_conn("get_guild", move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT config_json, ticket_number FROM guild_configs WHERE guild_id = ?1",
                    params![guild_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("get_guild", e.to_string()))?;
            row.map(|(json, number)| decode_config(&json, number))
                .transpose()
        })
        .await
    }

    async fn get_or_create_guild(&self, guild_id: GuildId) -> Result<GuildConfig, RepositoryError> {
        let defaults = serde_json::to_string(&GuildConfig::new(guild_id))
            .map_err(|e| RepositoryError::storage("serialize guild config", e.to_string()))?;

        self.with_conn("get_or_create_guild", move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO guild_configs (guild_id, config_json, ticket_number)
                 VALUES (?1, ?2, 0)",
                params![guild_id.to_string(), defaults],
            )
            .map_err(|e| RepositoryError::storage("get_or_create_guild", e.to_string()))?;

            let (json, number): (String, i64) = conn
                .query_row(
                    "SELECT config_json, ticket_number FROM guild_configs WHERE guild_id = ?1",
                    params![guild_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|e| RepositoryError::storage("get_or_create_guild", e.to_string()))?;
            decode_config(&json, number)
        })
        .await
    }

    async fn put_guild(&self, config: &GuildConfig) -> Result<(), RepositoryError> {
        let guild_id = config.guild_id;
        let json = serde_json::to_string(config)
            .map_err(|e| RepositoryError::storage("serialize guild config", e.to_string()))?;

        self.with_conn("put_guild", move |conn| {
            conn.execute(
                "INSERT INTO guild_configs (guild_id, config_json, ticket_number)
                 VALUES (?1, ?2, 0)
                 ON CONFLICT(guild_id) DO UPDATE SET config_json = excluded.config_json",
                params![guild_id.to_string(), json],
            )
            .map_err(|e| RepositoryError::storage("put_guild", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn allocate_ticket_number(
        &self,
        guild_id: GuildId,
    ) -> Result<TicketNumber, RepositoryError> {
        let defaults = serde_json::to_string(&GuildConfig::new(guild_id))
            .map_err(|e| RepositoryError::storage("serialize guild config", e.to_string()))?;

        self.with_conn("allocate_ticket_number", move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO guild_configs (guild_id, config_json, ticket_number)
                 VALUES (?1, ?2, 0)",
                params![guild_id.to_string(), defaults],
            )
            .map_err(|e| RepositoryError::storage("allocate_ticket_number", e.to_string()))?;

            let number: i64 = conn
                .query_row(
                    "UPDATE guild_configs SET ticket_number = ticket_number + 1
                     WHERE guild_id = ?1
                     RETURNING ticket_number",
                    params![guild_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| RepositoryError::storage("allocate_ticket_number", e.to_string()))?;
            i64_to_ticket_number(number, "allocate_ticket_number")
        })
        .await
    }

    async fn list_guilds(&self) -> Result<Vec<GuildConfig>, RepositoryError> {
        self.with_conn("list_guilds", |conn| {
            let mut stmt = conn
                .prepare("SELECT config_json, ticket_number FROM guild_configs ORDER BY guild_id")
                .map_err(|e| RepositoryError::storage("list_guilds", e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| RepositoryError::storage("list_guilds", e.to_string()))?;

            let mut configs = Vec::new();
            for row in rows {
                let (json, number) =
                    row.map_err(|e| RepositoryError::storage("list_guilds", e.to_string()))?;
                configs.push(decode_config(&json, number)?);
            }
            Ok(configs)
        })
        .await
    }
}

// =============================================================================
// TicketRepository
// =============================================================================

#[async_trait]
impl TicketRepository for SqliteRepository {
    async fn create_ticket(&self, ticket: &Ticket) -> Result<CreateOutcome, RepositoryError> {
        let ticket = ticket.clone();
        let json = serde_json::to_string(&ticket)
            .map_err(|e| RepositoryError::storage("serialize ticket", e.to_string()))?;
        let number = ticket_number_to_i64(ticket.key.number, "create_ticket")?;

        self.with_conn("create_ticket", move |conn| {
            let active: Option<String> = conn
                .query_row(
                    "SELECT ticket_json FROM tickets
                     WHERE guild_id = ?1 AND user_id = ?2
                       AND state IN ('OPEN', 'PENDING', 'PENDING_REDO')",
                    params![
                        ticket.key.guild_id.to_string(),
                        ticket.key.user_id.to_string()
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("create_ticket", e.to_string()))?;

            if let Some(json) = active {
                return Ok(CreateOutcome::ActiveExists(decode_ticket(&json)?));
            }

            conn.execute(
                "INSERT INTO tickets (guild_id, user_id, ticket_number, state, ticket_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ticket.key.guild_id.to_string(),
                    ticket.key.user_id.to_string(),
                    number,
                    ticket.state.as_str(),
                    json,
                    ticket.updated_at,
                ],
            )
            .map_err(|e| RepositoryError::storage("create_ticket", e.to_string()))?;

            Ok(CreateOutcome::Created)
        })
        .await
    }

    async fn get_ticket(&self, key: &TicketKey) -> Result<Option<Ticket>, RepositoryError> {
        let key = *key;
        self.with_conn("get_ticket", move |conn| read_ticket(conn, &key, "get_ticket"))
            .await
    }

    async fn latest_ticket(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<Ticket>, RepositoryError> {
        self.with_conn("latest_ticket", move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT ticket_json FROM tickets
                     WHERE guild_id = ?1 AND user_id = ?2
                     ORDER BY ticket_number DESC LIMIT 1",
                    params![guild_id.to_string(), user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| RepositoryError::storage("latest_ticket", e.to_string()))?;
            json.as_deref().map(decode_ticket).transpose()
        })
        .await
    }

    async fn record_progress(
        &self,
        key: &TicketKey,
        step: u32,
        answers: &BTreeMap<u32, Answer>,
    ) -> Result<bool, RepositoryError> {
        let key = *key;
        let answers = answers.clone();
        self.with_conn("record_progress", move |conn| {
            let Some(mut ticket) = read_ticket(conn, &key, "record_progress")? else {
                return Ok(false);
            };
            if ticket.state != TicketState::Open {
                return Ok(false);
            }
            ticket.step = step;
            ticket.answers = answers;
            ticket.updated_at = now_secs();
            write_ticket(conn, &ticket, "record_progress")?;
            Ok(true)
        })
        .await
    }

    async fn compare_and_set_state(
        &self,
        key: &TicketKey,
        from: TicketState,
        to: TicketState,
    ) -> Result<bool, RepositoryError> {
        let key = *key;
        self.with_conn("compare_and_set_state", move |conn| {
            let Some(mut ticket) = read_ticket(conn, &key, "compare_and_set_state")? else {
                return Ok(false);
            };
            if ticket.state != from {
                return Ok(false);
            }
            ticket.state = to;
            ticket.updated_at = now_secs();
            write_ticket(conn, &ticket, "compare_and_set_state")?;
            Ok(true)
        })
        .await
    }

    async fn set_submission(
        &self,
        key: &TicketKey,
        submission: &Submission,
    ) -> Result<(), RepositoryError> {
        let key = *key;
        let submission = submission.clone();
        self.with_conn("set_submission", move |conn| {
            let mut ticket = read_ticket(conn, &key, "set_submission")?.ok_or_else(|| {
                RepositoryError::storage("set_submission", format!("no ticket {}", key))
            })?;
            ticket.submission = Some(submission);
            ticket.updated_at = now_secs();
            write_ticket(conn, &ticket, "set_submission")
        })
        .await
    }

    async fn tickets_in_state(&self, state: TicketState) -> Result<Vec<Ticket>, RepositoryError> {
        self.with_conn("tickets_in_state", move |conn| {
            query_tickets(
                conn,
                "tickets_in_state",
                "SELECT guild_id, user_id, ticket_number, ticket_json FROM tickets
                 WHERE state = ?1
                 ORDER BY guild_id, user_id, ticket_number",
                params![state.as_str()],
            )
        })
        .await
    }

    async fn all_tickets(&self) -> Result<Vec<Ticket>, RepositoryError> {
        self.with_conn("all_tickets", |conn| {
            query_tickets(
                conn,
                "all_tickets",
                "SELECT guild_id, user_id, ticket_number, ticket_json FROM tickets
                 ORDER BY guild_id, user_id, ticket_number",
                [],
            )
        })
        .await
    }

    async fn delete_malformed(&self) -> Result<usize, RepositoryError> {
        self.with_conn("delete_malformed", |conn| {
            conn.execute(
                "DELETE FROM tickets
                 WHERE guild_id IN ('', '0') OR user_id IN ('', '0')",
                [],
            )
            .map_err(|e| RepositoryError::storage("delete_malformed", e.to_string()))
        })
        .await
    }

    async fn watch_queue_message(&self, entry: QueueEntry) -> Result<(), RepositoryError> {
        let number = ticket_number_to_i64(entry.ticket.number, "watch_queue_message")?;
        self.with_conn("watch_queue_message", move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO queue_messages
                    (message_id, channel_id, guild_id, user_id, ticket_number)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.message_id.to_string(),
                    entry.channel_id.to_string(),
                    entry.ticket.guild_id.to_string(),
                    entry.ticket.user_id.to_string(),
                    number,
                ],
            )
            .map_err(|e| RepositoryError::storage("watch_queue_message", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn watched_queue_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        self.with_conn("watched_queue_message", move |conn| {
            read_queue_entry(conn, message_id, "watched_queue_message")
        })
        .await
    }

    async fn queue_messages_for_ticket(
        &self,
        ticket: &TicketKey,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        let ticket = *ticket;
        let number = ticket_number_to_i64(ticket.number, "queue_messages_for_ticket")?;
        self.with_conn("queue_messages_for_ticket", move |conn| {
            let operation = "queue_messages_for_ticket";
            let mut stmt = conn
                .prepare(
                    "SELECT message_id, channel_id FROM queue_messages
                     WHERE guild_id = ?1 AND user_id = ?2 AND ticket_number = ?3",
                )
                .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
            let rows = stmt
                .query_map(
                    params![ticket.guild_id.to_string(), ticket.user_id.to_string(), number],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .map_err(|e| RepositoryError::storage(operation, e.to_string()))?;

            let mut entries = Vec::new();
            for row in rows {
                let (message, channel) =
                    row.map_err(|e| RepositoryError::storage(operation, e.to_string()))?;
                entries.push(QueueEntry {
                    channel_id: parse_id::<ChannelId>(&channel, "queue channel id")?,
                    message_id: parse_id::<MessageId>(&message, "queue message id")?,
                    ticket,
                });
            }
            entries.sort_by_key(|entry| entry.message_id);
            Ok(entries)
        })
        .await
    }

    async fn claim_queue_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        self.with_conn("claim_queue_message", move |conn| {
            let entry = read_queue_entry(conn, message_id, "claim_queue_message")?;
            if entry.is_none() {
                return Ok(None);
            }
            let removed = conn
                .execute(
                    "DELETE FROM queue_messages WHERE message_id = ?1",
                    params![message_id.to_string()],
                )
                .map_err(|e| RepositoryError::storage("claim_queue_message", e.to_string()))?;
            Ok(if removed == 1 { entry } else { None })
        })
        .await
    }
}
