//! Moderation reaction dispatcher.
//!
//! Moderators decide a ticket by reacting to its queue post. A reaction is
//! acted on only when the post is still watched, the reactor holds the
//! guild's admin role and the post's embed names the watched ticket. The
//! watch entry is claimed before any side effect, so of several concurrent
//! reactions on one post exactly one is applied.

mod actions;
pub mod audit;

pub use actions::{ModerationAction, QUEUE_REACTIONS};

use std::sync::Arc;
use std::time::Duration;

use gatekeeper_core::{
    colours, AgeBracket, ChannelId, Embed, GuildConfig, GuildId, MessageId, OutgoingMessage,
    RoleId, Submission, TicketKey, TicketState, UserId,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::gateway::{Gateway, GatewayError, Member, MessageHandle, Target};
use crate::state_machine::repository::{QueueEntry, RepositoryError};
use crate::state_machine::{StoreError, TicketEvent, TicketStore, TransitionError};
use crate::verification::DEFAULT_SUBREDDIT;

pub const DEFAULT_MEMBER_LEFT_LINGER: Duration = Duration::from_secs(5);
pub const DEFAULT_KICK_GRACE: Duration = Duration::from_secs(1);

/// A reaction as delivered by the gateway. `member` may be missing from
/// partial payloads and is then resolved.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReactionEvent {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    #[serde(default)]
    pub member: Option<Member>,
}

#[derive(Debug, Clone)]
pub struct ModerationSettings {
    /// How long the "member left" notice stays up.
    pub member_left_linger: Duration,
    /// Pause between the denial DM and the kick.
    pub kick_grace: Duration,
    pub subreddit: String,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            member_left_linger: DEFAULT_MEMBER_LEFT_LINGER,
            kick_grace: DEFAULT_KICK_GRACE,
            subreddit: DEFAULT_SUBREDDIT.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("no \"{channel}\" channel set")]
    NoChannelSet { channel: &'static str },
    #[error("\"{channel}\" channel is missing")]
    ChannelMissing { channel: &'static str },
    #[error("no \"{role}\" role set")]
    NoRoleSet { role: &'static str },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<StoreError> for ModerationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transition(e) => ModerationError::Transition(e),
            StoreError::Repository(e) => ModerationError::Repository(e),
        }
    }
}

impl ModerationError {
    /// The one-liner for the channel the reaction came from, if admins can
    /// act on it.
    pub fn notice(&self) -> Option<Embed> {
        let text = match self {
            ModerationError::NoChannelSet { channel } => format!(
                "🚫 Please contact the admins/mods as no \"{}\" channel has been set in the config.",
                channel
            ),
            ModerationError::ChannelMissing { channel } => format!(
                "🚫 Please contact the admins/mods as the \"{}\" channel is missing.",
                channel
            ),
            ModerationError::NoRoleSet { role } => format!(
                "🚫 Please contact the admins/mods no \"{}\" role has been set in the config.",
                role
            ),
            ModerationError::Gateway(e) => match e {
                GatewayError::MissingAccess { .. } => match e.denied_channel() {
                    Some(channel) => format!(
                        "🚫 Please contact the admins/mods as I don't have permission to post in {}.",
                        channel.mention()
                    ),
                    None => "🚫 Please contact the admins/mods as I'm missing permissions for that."
                        .to_string(),
                },
                _ => "🚫 Please contact the admins/mods as I've hit a Discord API error.".to_string(),
            },
            ModerationError::Repository(_) | ModerationError::Transition(_) => return None,
        };
        Some(Embed::notice(text).with_color(colours::RED))
    }
}

/// What became of one reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Ignored,
    /// The ticket's member had left; the queue post was removed.
    MemberLeft(TicketKey),
    Applied {
        ticket: TicketKey,
        action: ModerationAction,
        state: TicketState,
    },
    Failed,
}

#[derive(Clone)]
pub struct ModerationDispatcher {
    gateway: Arc<dyn Gateway>,
    store: TicketStore,
    settings: ModerationSettings,
}

impl ModerationDispatcher {
    pub fn new(gateway: Arc<dyn Gateway>, store: TicketStore, settings: ModerationSettings) -> Self {
        Self {
            gateway,
            store,
            settings,
        }
    }

    /// Handle one reaction. Errors end here: admins get a notice when they
    /// can fix the cause, everything else is logged.
    pub async fn handle_reaction(&self, reaction: &ReactionEvent) -> Dispatch {
        match self.dispatch(reaction).await {
            Ok(outcome) => outcome,
            Err(e) => {
                match e.notice() {
                    Some(notice) => {
                        warn!("Reaction on {} needs admin attention: {}", reaction.message_id, e);
                        let sent = self
                            .gateway
                            .send_message(Target::Channel(reaction.channel_id), notice.into())
                            .await;
                        if let Err(send) = sent {
                            debug!("Could not post notice in {}: {}", reaction.channel_id, send);
                        }
                    }
                    None => error!("Reaction on {} failed: {}", reaction.message_id, e),
                }
                Dispatch::Failed
            }
        }
    }

    async fn reactor(
        &self,
        guild_id: GuildId,
        reaction: &ReactionEvent,
    ) -> Result<Option<Member>, ModerationError> {
        match &reaction.member {
            Some(member) => Ok(Some(member.clone())),
            None => Ok(self.gateway.resolve_member(guild_id, reaction.user_id).await?),
        }
    }

    async fn dispatch(&self, reaction: &ReactionEvent) -> Result<Dispatch, ModerationError> {
        let repo = self.store.repository();
        let Some(entry) = repo.watched_queue_message(reaction.message_id).await? else {
            return Ok(Dispatch::Ignored);
        };
        let guild_id = reaction.guild_id.unwrap_or(entry.ticket.guild_id);

        let Some(reactor) = self.reactor(guild_id, reaction).await? else {
            return Ok(Dispatch::Ignored);
        };
        if reactor.user.bot {
            return Ok(Dispatch::Ignored);
        }
        let config = repo.get_or_create_guild(guild_id).await?;
        if !config.is_admin(&reactor.roles) {
            debug!("Ignoring reaction from non-admin {}", reactor.user.id);
            return Ok(Dispatch::Ignored);
        }

        let Some(post) = self
            .gateway
            .fetch_message(entry.channel_id, entry.message_id)
            .await?
        else {
            return Ok(Dispatch::Ignored);
        };
        let Some(embed) = post.embeds.first() else {
            return Ok(Dispatch::Ignored);
        };
        let (Some(number), Some(member_id)) = (embed.ticket_number(), embed.tagged_member()) else {
            return Ok(Dispatch::Ignored);
        };
        let key = TicketKey::new(guild_id, member_id, number);
        if key != entry.ticket {
            warn!(
                "Queue post {} names ticket {} but watches {}",
                entry.message_id, key, entry.ticket
            );
            return Ok(Dispatch::Ignored);
        }
        let Some(action) = ModerationAction::from_emoji(&reaction.emoji) else {
            return Ok(Dispatch::Ignored);
        };
        let ticket = repo.get_ticket(&key).await?;
        if ticket.as_ref().map(|t| t.state) == Some(TicketState::Open) {
            debug!("Ticket #{} is not queued yet", key.number);
            return Ok(Dispatch::Ignored);
        }
        info!(
            "Ticket #{} reaction {} ({}) by {}",
            key.number, reaction.emoji, action, reactor.user.id
        );

        let handle = MessageHandle {
            channel_id: entry.channel_id,
            message_id: entry.message_id,
        };
        let Some(member) = self.gateway.resolve_member(guild_id, member_id).await? else {
            return self.member_gone(reaction, &entry, handle).await;
        };

        let audit_channel = self.audit_channel(&config).await?;
        if action == ModerationAction::Approve && config.member_roles.is_empty() {
            return Err(ModerationError::NoRoleSet { role: "member" });
        }

        if repo.claim_queue_message(entry.message_id).await?.is_none() {
            debug!("Ticket #{} already decided", key.number);
            return Ok(Dispatch::Ignored);
        }

        let submission = ticket
            .and_then(|ticket| ticket.submission)
            .or_else(|| Submission::from_embed(embed));

        let applied = self
            .apply(action, &config, &member, key, submission.as_ref())
            .await;
        if let Err(e) = &applied {
            warn!("Ticket #{} {} failed: {}", key.number, action, e);
        }

        let recorded = self.record(audit_channel, embed, &key).await;
        if let Err(e) = self.gateway.delete_message(&handle).await {
            warn!("Failed to delete queue post for ticket #{}: {}", key.number, e);
        }

        let state = applied?;
        recorded?;
        Ok(Dispatch::Applied {
            ticket: key,
            action,
            state,
        })
    }

    async fn audit_channel(&self, config: &GuildConfig) -> Result<ChannelId, ModerationError> {
        let channel = config
            .audit_log_channel
            .ok_or(ModerationError::NoChannelSet {
                channel: "audit-log",
            })?;
        self.gateway
            .resolve_channel(channel)
            .await?
            .map(|channel| channel.id)
            .ok_or(ModerationError::ChannelMissing {
                channel: "audit-log",
            })
    }

    async fn record(
        &self,
        audit_channel: ChannelId,
        queue_post: &Embed,
        key: &TicketKey,
    ) -> Result<(), ModerationError> {
        let Some(ticket) = self.store.repository().get_ticket(key).await? else {
            return Ok(());
        };
        self.gateway
            .send_message(
                Target::Channel(audit_channel),
                audit::decision_entry(queue_post, ticket.state).into(),
            )
            .await?;
        Ok(())
    }

    async fn member_gone(
        &self,
        reaction: &ReactionEvent,
        entry: &QueueEntry,
        queue_post: MessageHandle,
    ) -> Result<Dispatch, ModerationError> {
        if self
            .store
            .repository()
            .claim_queue_message(entry.message_id)
            .await?
            .is_none()
        {
            return Ok(Dispatch::Ignored);
        }
        info!("Ticket #{} member has left the guild", entry.ticket.number);

        let notice = self
            .gateway
            .send_message(
                Target::Channel(reaction.channel_id),
                Embed::notice("Member has left the guild").into(),
            )
            .await?;
        tokio::time::sleep(self.settings.member_left_linger).await;

        for handle in [queue_post, notice] {
            if let Err(e) = self.gateway.delete_message(&handle).await {
                debug!("Could not delete {}: {}", handle.message_id, e);
            }
        }
        Ok(Dispatch::MemberLeft(entry.ticket))
    }

    async fn guild_name(&self, guild_id: GuildId) -> String {
        match self.gateway.resolve_guild(guild_id).await {
            Ok(Some(guild)) => guild.name,
            _ => guild_id.to_string(),
        }
    }

    async fn tell_member(&self, key: &TicketKey, embed: Embed) {
        let embed = embed.with_footer(key.number.footer());
        if let Err(e) = self
            .gateway
            .send_message(Target::User(key.user_id), embed.into())
            .await
        {
            info!("Ticket #{} could not DM member: {}", key.number, e);
        }
    }

    async fn apply(
        &self,
        action: ModerationAction,
        config: &GuildConfig,
        member: &Member,
        key: TicketKey,
        submission: Option<&Submission>,
    ) -> Result<TicketState, ModerationError> {
        let state = self.store.apply(&key, action.event()).await?;
        let guild = self.guild_name(key.guild_id).await;

        match action {
            ModerationAction::Approve => {
                self.grant_roles(config, member, submission).await?;
                self.tell_member(
                    &key,
                    Embed::notice(format!("🚀 Verification approved for {}!", guild))
                        .with_color(colours::GREEN)
                        .with_description("I hope you enjoy your day. :slight_smile:"),
                )
                .await;
                self.announce(config, member, submission, &guild).await?;
            }
            ModerationAction::Redo => {
                self.tell_member(
                    &key,
                    Embed::notice(format!("🚀 Verification denied for {}!", guild))
                        .with_color(colours::RED)
                        .with_description(
                            "Don't worry though as you're able to redo it. \
                             Just reply with \"!start\" and we'll try again.",
                        ),
                )
                .await;
            }
            ModerationAction::Deny => {
                self.tell_member(
                    &key,
                    Embed::notice(format!("🚀 Verification denied for {}!", guild))
                        .with_color(colours::RED)
                        .with_description("Your verification was denied!"),
                )
                .await;
                tokio::time::sleep(self.settings.kick_grace).await;
                self.gateway.kick_member(key.guild_id, key.user_id).await?;
                info!("Ticket #{} member kicked", key.number);
            }
            ModerationAction::MissingImage => {
                self.tell_member(
                    &key,
                    Embed::notice("🚀 Verification failed!")
                        .with_color(colours::RED)
                        .with_description(
                            "It seems the image you tried sending broke on our end. \
                             Please visit the server where you applied and retry with a different one.",
                        ),
                )
                .await;
            }
        }
        Ok(state)
    }

    /// Roles an approved member receives.
    pub fn roles_for(&self, config: &GuildConfig, submission: Option<&Submission>) -> Vec<RoleId> {
        let mut roles = config.member_roles.clone();
        if let Some(submission) = submission {
            if submission.is_seller {
                roles.extend(config.seller_roles.iter().copied());
                if submission.has_reddit_verification(&self.settings.subreddit) {
                    roles.extend(config.reddit_seller_role);
                }
            }
            roles.extend(
                AgeBracket::for_age(submission.age)
                    .and_then(|bracket| config.age_roles.role_for(bracket)),
            );
            roles.extend(config.dm_roles.role_for(submission.dm_preference));
        }

        let mut unique = Vec::with_capacity(roles.len());
        for role in roles {
            if !unique.contains(&role) {
                unique.push(role);
            }
        }
        unique
    }

    async fn grant_roles(
        &self,
        config: &GuildConfig,
        member: &Member,
        submission: Option<&Submission>,
    ) -> Result<(), ModerationError> {
        for role in self.roles_for(config, submission) {
            if member.has_role(role) {
                continue;
            }
            self.gateway
                .add_role(config.guild_id, member.user.id, role)
                .await?;
        }
        Ok(())
    }

    async fn announce(
        &self,
        config: &GuildConfig,
        member: &Member,
        submission: Option<&Submission>,
        guild: &str,
    ) -> Result<(), ModerationError> {
        let Some(channel) = config.announcement_channel else {
            debug!("No announcement channel set for {}", config.guild_id);
            return Ok(());
        };

        let content = match config.welcome_role {
            Some(role) => format!("{} | {}", role.mention(), member.user.id.mention()),
            None => member.user.id.mention(),
        };
        let description = match submission {
            Some(submission) if submission.is_seller => {
                let links = submission
                    .link_lines()
                    .iter()
                    .map(|line| format!("➜ {}", line))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("**__A new seller just joined!__**\n\n{}", links)
            }
            _ => format!("**__Welcome to {}__**", guild),
        };

        let message = OutgoingMessage::from(
            Embed::text(description).with_color(colours::GREEN),
        )
        .with_content(content);
        self.gateway
            .send_message(Target::Channel(channel), message)
            .await?;
        Ok(())
    }

    /// A member left the guild: close their OPEN or PENDING ticket, withdraw
    /// its queue post and note it in the audit log. VERIFIED and DENIED
    /// tickets stay as they are so a denial still blocks a rejoin.
    pub async fn handle_member_left(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<TicketKey>, ModerationError> {
        let repo = self.store.repository();
        let Some(ticket) = repo.latest_ticket(guild_id, user_id).await? else {
            return Ok(None);
        };
        if !matches!(ticket.state, TicketState::Open | TicketState::Pending) {
            return Ok(None);
        }

        match self.store.apply(&ticket.key, TicketEvent::MemberLeft).await {
            Ok(_) => {}
            Err(StoreError::Transition(e)) => {
                debug!("Ticket #{} not closed on leave: {}", ticket.key.number, e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        for entry in repo.queue_messages_for_ticket(&ticket.key).await? {
            if repo.claim_queue_message(entry.message_id).await?.is_none() {
                continue;
            }
            let post = MessageHandle {
                channel_id: entry.channel_id,
                message_id: entry.message_id,
            };
            if let Err(e) = self.gateway.delete_message(&post).await {
                warn!("Ticket #{} could not delete queue post: {}", ticket.key.number, e);
            }
        }

        let config = repo.get_or_create_guild(guild_id).await?;
        if let Some(channel) = config.audit_log_channel {
            let entry = audit::member_left_entry(user_id, ticket.key.number);
            if let Err(e) = self
                .gateway
                .send_message(Target::Channel(channel), entry.into())
                .await
            {
                warn!("Ticket #{} could not post leave to audit log: {}", ticket.key.number, e);
            }
        }
        Ok(Some(ticket.key))
    }
}
