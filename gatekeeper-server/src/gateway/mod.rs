//! The chat platform as the rest of the service sees it.
//!
//! `Gateway` is the seam between the verification flow, the reaction
//! dispatcher and Discord. Production uses `DiscordGateway` (REST calls plus
//! the reply broker fed by the event ingress); tests use `fake::FakeGateway`.

pub mod discord;
#[cfg(test)]
pub mod fake;
pub mod replies;

pub use discord::{DiscordClient, DiscordGateway};
pub use replies::ReplyBroker;

use std::time::Duration;

use async_trait::async_trait;
use gatekeeper_core::{
    answers, ChannelId, Embed, GuildId, MessageId, OutgoingMessage, RoleId, UserId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a message goes. A user target means their DM channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Channel(ChannelId),
    User(UserId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    pub fn avatar_url(&self) -> Option<String> {
        self.avatar
            .as_deref()
            .map(|hash| answers::avatar_url(self.id, hash))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub filename: String,
}

/// A message delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    /// Absent for direct messages.
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

impl IncomingMessage {
    pub fn handle(&self) -> MessageHandle {
        MessageHandle {
            channel_id: self.channel_id,
            message_id: self.id,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.guild_id.is_none()
    }

    pub fn first_attachment(&self) -> Option<&Attachment> {
        self.attachments.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl Member {
    pub fn display_name(&self) -> &str {
        self.nick.as_deref().unwrap_or(&self.user.username)
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInfo {
    pub id: GuildId,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("missing access to {path}")]
    MissingAccess { path: String },
    #[error("{path} not found")]
    NotFound { path: String },
    #[error("Discord API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// The channel a `MissingAccess` error was raised for, when the request
    /// path was under `/channels/<id>`.
    pub fn denied_channel(&self) -> Option<ChannelId> {
        let GatewayError::MissingAccess { path } = self else {
            return None;
        };
        let mut segments = path.trim_start_matches('/').split('/');
        match (segments.next(), segments.next()) {
            (Some("channels"), Some(id)) => id.parse().ok(),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_message(
        &self,
        target: Target,
        message: OutgoingMessage,
    ) -> Result<MessageHandle, GatewayError>;

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        message: OutgoingMessage,
    ) -> Result<(), GatewayError>;

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), GatewayError>;

    /// Wait for the next message `author` posts in `channel`. `None` when the
    /// deadline passes first.
    async fn await_reply(
        &self,
        channel: ChannelId,
        author: UserId,
        timeout: Duration,
    ) -> Option<IncomingMessage>;

    async fn add_reaction(&self, handle: &MessageHandle, emoji: &str) -> Result<(), GatewayError>;

    async fn remove_reaction(
        &self,
        handle: &MessageHandle,
        emoji: &str,
        user: UserId,
    ) -> Result<(), GatewayError>;

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<IncomingMessage>, GatewayError>;

    async fn resolve_member(
        &self,
        guild: GuildId,
        user: UserId,
    ) -> Result<Option<Member>, GatewayError>;

    async fn resolve_role(&self, guild: GuildId, role: RoleId)
        -> Result<Option<Role>, GatewayError>;

    async fn resolve_channel(&self, channel: ChannelId) -> Result<Option<Channel>, GatewayError>;

    async fn resolve_guild(&self, guild: GuildId) -> Result<Option<GuildInfo>, GatewayError>;

    async fn add_role(&self, guild: GuildId, user: UserId, role: RoleId)
        -> Result<(), GatewayError>;

    async fn kick_member(&self, guild: GuildId, user: UserId) -> Result<(), GatewayError>;
}
