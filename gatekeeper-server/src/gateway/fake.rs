//! A scripted in-process gateway for tests.
//!
//! Every outgoing call is recorded. Replies are served from per-channel queues;
//! an empty queue behaves like an expired deadline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gatekeeper_core::{ChannelId, GuildId, MessageId, OutgoingMessage, RoleId, UserId};

use super::{
    Attachment, Channel, Gateway, GatewayError, GuildInfo, IncomingMessage, Member, MessageHandle,
    Role, Target, User,
};

pub const BOT_ID: UserId = UserId(1);
const DM_CHANNEL_BASE: u64 = 1_000_000;

/// The DM channel the fake assigns to `user`.
pub fn dm_channel(user: UserId) -> ChannelId {
    ChannelId(DM_CHANNEL_BASE + user.0)
}

pub fn user(id: u64, name: &str, avatar: Option<&str>) -> User {
    User {
        id: UserId(id),
        username: name.to_string(),
        avatar: avatar.map(str::to_string),
        bot: false,
    }
}

pub fn member(id: u64, name: &str, avatar: Option<&str>, roles: &[RoleId]) -> Member {
    Member {
        user: user(id, name, avatar),
        nick: None,
        roles: roles.to_vec(),
    }
}

/// A message from `author` in their DM with the bot.
pub fn dm_from(author: &User, content: &str) -> IncomingMessage {
    IncomingMessage {
        id: MessageId(0),
        channel_id: dm_channel(author.id),
        guild_id: None,
        author: author.clone(),
        content: content.to_string(),
        attachments: Vec::new(),
        embeds: Vec::new(),
    }
}

/// Flatten a message's text (content, embed author line, description) for assertions.
pub fn text_of(message: &OutgoingMessage) -> String {
    let mut parts = Vec::new();
    if let Some(content) = &message.content {
        parts.push(content.clone());
    }
    for embed in &message.embeds {
        if let Some(author) = &embed.author {
            parts.push(author.name.clone());
        }
        if let Some(description) = &embed.description {
            parts.push(description.clone());
        }
    }
    parts.join(" | ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send {
        target: Target,
        handle: MessageHandle,
        message: OutgoingMessage,
    },
    Edit {
        handle: MessageHandle,
        message: OutgoingMessage,
    },
    Delete(MessageHandle),
    React {
        handle: MessageHandle,
        emoji: String,
    },
    Unreact {
        handle: MessageHandle,
        emoji: String,
        user: UserId,
    },
    AddRole {
        guild: GuildId,
        user: UserId,
        role: RoleId,
    },
    Kick {
        guild: GuildId,
        user: UserId,
    },
}

#[derive(Default)]
struct FakeState {
    next_message_id: u64,
    calls: Vec<Call>,
    replies: HashMap<(ChannelId, UserId), VecDeque<IncomingMessage>>,
    awaits: usize,
    members: HashMap<(GuildId, UserId), Member>,
    roles: HashMap<(GuildId, RoleId), Role>,
    channels: HashMap<ChannelId, Channel>,
    guilds: HashMap<GuildId, GuildInfo>,
    messages: HashMap<MessageId, IncomingMessage>,
    unreachable: HashSet<UserId>,
    denied_channels: HashSet<ChannelId>,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_guild(&self, id: GuildId, name: &str) {
        self.state.lock().unwrap().guilds.insert(
            id,
            GuildInfo {
                id,
                name: name.to_string(),
            },
        );
    }

    pub fn add_member(&self, guild: GuildId, member: Member) {
        self.state
            .lock()
            .unwrap()
            .members
            .insert((guild, member.user.id), member);
    }

    pub fn add_role(&self, guild: GuildId, id: RoleId, name: &str) {
        self.state.lock().unwrap().roles.insert(
            (guild, id),
            Role {
                id,
                name: name.to_string(),
            },
        );
    }

    pub fn add_channel(&self, guild: GuildId, id: ChannelId, name: &str) {
        self.state.lock().unwrap().channels.insert(
            id,
            Channel {
                id,
                name: Some(name.to_string()),
                guild_id: Some(guild),
            },
        );
    }

    /// Sends to this user fail as if their DMs were closed.
    pub fn make_unreachable(&self, user: UserId) {
        self.state.lock().unwrap().unreachable.insert(user);
    }

    /// The bot lacks access to this channel.
    pub fn deny_channel(&self, channel: ChannelId) {
        self.state.lock().unwrap().denied_channels.insert(channel);
    }

    pub fn queue_reply(&self, message: IncomingMessage) {
        self.state
            .lock()
            .unwrap()
            .replies
            .entry((message.channel_id, message.author.id))
            .or_default()
            .push_back(message);
    }

    /// Queue a text DM reply from `author`.
    pub fn queue_dm(&self, author: &User, content: &str) {
        self.queue_reply(dm_from(author, content));
    }

    /// Queue a DM reply from `author` carrying one attachment.
    pub fn queue_dm_attachment(&self, author: &User, url: &str) {
        let mut message = dm_from(author, "");
        message.attachments.push(Attachment {
            url: url.to_string(),
            filename: url.rsplit('/').next().unwrap_or(url).to_string(),
        });
        self.queue_reply(message);
    }

    pub fn pending_replies(&self) -> usize {
        self.state.lock().unwrap().replies.values().map(VecDeque::len).sum()
    }

    pub fn await_count(&self) -> usize {
        self.state.lock().unwrap().awaits
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Text of every message sent to `target`, in order.
    pub fn sent_texts(&self, target: Target) -> Vec<String> {
        self.sent_to(target).iter().map(text_of).collect()
    }

    pub fn sent_to(&self, target: Target) -> Vec<OutgoingMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send {
                    target: t, message, ..
                } if t == target => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn granted_roles(&self, guild: GuildId, user: UserId) -> Vec<RoleId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AddRole { guild: g, user: u, role } if g == guild && u == user => Some(role),
                _ => None,
            })
            .collect()
    }

    pub fn was_kicked(&self, guild: GuildId, user: UserId) -> bool {
        self.calls()
            .iter()
            .any(|call| *call == Call::Kick { guild, user })
    }

    pub fn was_deleted(&self, handle: MessageHandle) -> bool {
        self.calls().iter().any(|call| *call == Call::Delete(handle))
    }

    pub fn reactions_on(&self, handle: MessageHandle) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::React { handle: h, emoji } if h == handle => Some(emoji),
                _ => None,
            })
            .collect()
    }

    /// Current body of a message the bot sent, after any edits.
    pub fn message(&self, id: MessageId) -> Option<IncomingMessage> {
        self.state.lock().unwrap().messages.get(&id).cloned()
    }
}

fn denied(channel: ChannelId) -> GatewayError {
    GatewayError::MissingAccess {
        path: format!("/channels/{}/messages", channel),
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn send_message(
        &self,
        target: Target,
        message: OutgoingMessage,
    ) -> Result<MessageHandle, GatewayError> {
        let mut state = self.state.lock().unwrap();
        let (channel_id, guild_id) = match target {
            Target::User(user) => {
                if state.unreachable.contains(&user) {
                    return Err(denied(dm_channel(user)));
                }
                (dm_channel(user), None)
            }
            Target::Channel(channel) => {
                if state.denied_channels.contains(&channel) {
                    return Err(denied(channel));
                }
                let Some(known) = state.channels.get(&channel) else {
                    return Err(GatewayError::NotFound {
                        path: format!("/channels/{}/messages", channel),
                    });
                };
                (channel, known.guild_id)
            }
        };

        state.next_message_id += 1;
        let handle = MessageHandle {
            channel_id,
            message_id: MessageId(10_000 + state.next_message_id),
        };
        state.messages.insert(
            handle.message_id,
            IncomingMessage {
                id: handle.message_id,
                channel_id,
                guild_id,
                author: User {
                    id: BOT_ID,
                    username: "gatekeeper".to_string(),
                    avatar: None,
                    bot: true,
                },
                content: message.content.clone().unwrap_or_default(),
                attachments: Vec::new(),
                embeds: message.embeds.clone(),
            },
        );
        state.calls.push(Call::Send {
            target,
            handle,
            message,
        });
        Ok(handle)
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        message: OutgoingMessage,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        let Some(stored) = state.messages.get_mut(&handle.message_id) else {
            return Err(GatewayError::NotFound {
                path: format!("/channels/{}/messages/{}", handle.channel_id, handle.message_id),
            });
        };
        if let Some(content) = &message.content {
            stored.content = content.clone();
        }
        if !message.embeds.is_empty() {
            stored.embeds = message.embeds.clone();
        }
        state.calls.push(Call::Edit {
            handle: *handle,
            message,
        });
        Ok(())
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.messages.remove(&handle.message_id);
        state.calls.push(Call::Delete(*handle));
        Ok(())
    }

    async fn await_reply(
        &self,
        channel: ChannelId,
        author: UserId,
        _timeout: Duration,
    ) -> Option<IncomingMessage> {
        let mut state = self.state.lock().unwrap();
        state.awaits += 1;
        state
            .replies
            .get_mut(&(channel, author))
            .and_then(VecDeque::pop_front)
    }

    async fn add_reaction(&self, handle: &MessageHandle, emoji: &str) -> Result<(), GatewayError> {
        self.state.lock().unwrap().calls.push(Call::React {
            handle: *handle,
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn remove_reaction(
        &self,
        handle: &MessageHandle,
        emoji: &str,
        user: UserId,
    ) -> Result<(), GatewayError> {
        self.state.lock().unwrap().calls.push(Call::Unreact {
            handle: *handle,
            emoji: emoji.to_string(),
            user,
        });
        Ok(())
    }

    async fn fetch_message(
        &self,
        _channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<IncomingMessage>, GatewayError> {
        Ok(self.state.lock().unwrap().messages.get(&message).cloned())
    }

    async fn resolve_member(
        &self,
        guild: GuildId,
        user: UserId,
    ) -> Result<Option<Member>, GatewayError> {
        Ok(self.state.lock().unwrap().members.get(&(guild, user)).cloned())
    }

    async fn resolve_role(
        &self,
        guild: GuildId,
        role: RoleId,
    ) -> Result<Option<Role>, GatewayError> {
        Ok(self.state.lock().unwrap().roles.get(&(guild, role)).cloned())
    }

    async fn resolve_channel(&self, channel: ChannelId) -> Result<Option<Channel>, GatewayError> {
        let state = self.state.lock().unwrap();
        if state.denied_channels.contains(&channel) {
            return Err(GatewayError::MissingAccess {
                path: format!("/channels/{}", channel),
            });
        }
        Ok(state.channels.get(&channel).cloned())
    }

    async fn resolve_guild(&self, guild: GuildId) -> Result<Option<GuildInfo>, GatewayError> {
        Ok(self.state.lock().unwrap().guilds.get(&guild).cloned())
    }

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        let Some(member) = state.members.get_mut(&(guild, user)) else {
            return Err(GatewayError::NotFound {
                path: format!("/guilds/{}/members/{}", guild, user),
            });
        };
        if !member.roles.contains(&role) {
            member.roles.push(role);
        }
        state.calls.push(Call::AddRole { guild, user, role });
        Ok(())
    }

    async fn kick_member(&self, guild: GuildId, user: UserId) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.members.remove(&(guild, user));
        state.calls.push(Call::Kick { guild, user });
        Ok(())
    }
}
