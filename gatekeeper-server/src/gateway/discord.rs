//! Discord REST API v10 client and the production `Gateway`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gatekeeper_core::{ChannelId, GuildId, MessageId, OutgoingMessage, RoleId, UserId};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::{
    Channel, Gateway, GatewayError, GuildInfo, IncomingMessage, Member, MessageHandle,
    ReplyBroker, Role, Target,
};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Deserialize)]
struct DmChannelResponse {
    id: ChannelId,
}

#[derive(Debug, Deserialize)]
struct CreatedMessageResponse {
    id: MessageId,
    channel_id: ChannelId,
}

#[derive(Clone)]
pub struct DiscordClient {
    client: Client,
    api_base: String,
    token: String,
    dm_channels: Arc<RwLock<HashMap<UserId, ChannelId>>>,
}

/// Percent-encode an emoji for use as a path segment.
fn encode_emoji(emoji: &str) -> String {
    url::form_urlencoded::byte_serialize(emoji.as_bytes()).collect()
}

impl DiscordClient {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("DiscordBot (gatekeeper, {})", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Discord HTTP client")?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            dm_channels: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, GatewayError> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{} {}: {}", method, path, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::FORBIDDEN => Err(GatewayError::MissingAccess {
                path: path.to_string(),
            }),
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound {
                path: path.to_string(),
            }),
            _ => {
                let error_text = response.text().await.unwrap_or_default();
                error!("Discord API error on {} {}: {} - {}", method, path, status, error_text);
                Err(GatewayError::Api {
                    status: status.as_u16(),
                    message: error_text,
                })
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, GatewayError> {
        match self.request(Method::GET, path, None).await {
            Ok(response) => Self::decode(response).await.map(Some),
            Err(GatewayError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The DM channel with `user`, opened on first use and cached.
    pub async fn dm_channel(&self, user: UserId) -> Result<ChannelId, GatewayError> {
        if let Some(channel) = self.dm_channels.read().await.get(&user) {
            return Ok(*channel);
        }

        let response = self
            .request(
                Method::POST,
                "/users/@me/channels",
                Some(json!({ "recipient_id": user.to_string() })),
            )
            .await?;
        let channel: DmChannelResponse = Self::decode(response).await?;
        debug!("Opened DM channel {} with {}", channel.id, user);

        self.dm_channels.write().await.insert(user, channel.id);
        Ok(channel.id)
    }

    pub async fn create_message(
        &self,
        channel: ChannelId,
        message: &OutgoingMessage,
    ) -> Result<MessageHandle, GatewayError> {
        let body = serde_json::to_value(message).map_err(|e| GatewayError::Decode(e.to_string()))?;
        let response = self
            .request(
                Method::POST,
                &format!("/channels/{}/messages", channel),
                Some(body),
            )
            .await?;
        let created: CreatedMessageResponse = Self::decode(response).await?;
        Ok(MessageHandle {
            channel_id: created.channel_id,
            message_id: created.id,
        })
    }

    pub async fn edit_message(
        &self,
        handle: &MessageHandle,
        message: &OutgoingMessage,
    ) -> Result<(), GatewayError> {
        let body = serde_json::to_value(message).map_err(|e| GatewayError::Decode(e.to_string()))?;
        self.request(
            Method::PATCH,
            &format!("/channels/{}/messages/{}", handle.channel_id, handle.message_id),
            Some(body),
        )
        .await?;
        Ok(())
    }

    /// Deleting a message that is already gone succeeds.
    pub async fn delete_message(&self, handle: &MessageHandle) -> Result<(), GatewayError> {
        let path = format!("/channels/{}/messages/{}", handle.channel_id, handle.message_id);
        match self.request(Method::DELETE, &path, None).await {
            Ok(_) | Err(GatewayError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn add_reaction(&self, handle: &MessageHandle, emoji: &str) -> Result<(), GatewayError> {
        let path = format!(
            "/channels/{}/messages/{}/reactions/{}/@me",
            handle.channel_id,
            handle.message_id,
            encode_emoji(emoji)
        );
        self.request(Method::PUT, &path, None).await?;
        Ok(())
    }

    pub async fn remove_reaction(
        &self,
        handle: &MessageHandle,
        emoji: &str,
        user: UserId,
    ) -> Result<(), GatewayError> {
        let path = format!(
            "/channels/{}/messages/{}/reactions/{}/{}",
            handle.channel_id,
            handle.message_id,
            encode_emoji(emoji),
            user
        );
        self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    pub async fn get_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<IncomingMessage>, GatewayError> {
        self.get_optional(&format!("/channels/{}/messages/{}", channel, message))
            .await
    }

    pub async fn get_member(
        &self,
        guild: GuildId,
        user: UserId,
    ) -> Result<Option<Member>, GatewayError> {
        self.get_optional(&format!("/guilds/{}/members/{}", guild, user))
            .await
    }

    pub async fn get_role(&self, guild: GuildId, role: RoleId) -> Result<Option<Role>, GatewayError> {
        let roles: Option<Vec<Role>> = self.get_optional(&format!("/guilds/{}/roles", guild)).await?;
        Ok(roles.and_then(|roles| roles.into_iter().find(|r| r.id == role)))
    }

    pub async fn get_channel(&self, channel: ChannelId) -> Result<Option<Channel>, GatewayError> {
        self.get_optional(&format!("/channels/{}", channel)).await
    }

    pub async fn get_guild(&self, guild: GuildId) -> Result<Option<GuildInfo>, GatewayError> {
        self.get_optional(&format!("/guilds/{}", guild)).await
    }

    pub async fn add_member_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), GatewayError> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild, user, role);
        self.request(Method::PUT, &path, None).await?;
        info!("Granted role {} to {} in guild {}", role, user, guild);
        Ok(())
    }

    pub async fn remove_member(&self, guild: GuildId, user: UserId) -> Result<(), GatewayError> {
        let path = format!("/guilds/{}/members/{}", guild, user);
        self.request(Method::DELETE, &path, None).await?;
        info!("Removed {} from guild {}", user, guild);
        Ok(())
    }
}

/// REST client for outgoing calls, reply broker for awaited replies.
#[derive(Clone)]
pub struct DiscordGateway {
    client: DiscordClient,
    replies: Arc<ReplyBroker>,
}

impl DiscordGateway {
    pub fn new(client: DiscordClient, replies: Arc<ReplyBroker>) -> Self {
        Self { client, replies }
    }
}

#[async_trait]
impl Gateway for DiscordGateway {
    async fn send_message(
        &self,
        target: Target,
        message: OutgoingMessage,
    ) -> Result<MessageHandle, GatewayError> {
        let channel = match target {
            Target::Channel(channel) => channel,
            Target::User(user) => self.client.dm_channel(user).await?,
        };
        self.client.create_message(channel, &message).await
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        message: OutgoingMessage,
    ) -> Result<(), GatewayError> {
        self.client.edit_message(handle, &message).await
    }

    async fn delete_message(&self, handle: &MessageHandle) -> Result<(), GatewayError> {
        self.client.delete_message(handle).await
    }

    async fn await_reply(
        &self,
        channel: ChannelId,
        author: UserId,
        timeout: Duration,
    ) -> Option<IncomingMessage> {
        self.replies.wait_for(channel, author, timeout).await
    }

    async fn add_reaction(&self, handle: &MessageHandle, emoji: &str) -> Result<(), GatewayError> {
        self.client.add_reaction(handle, emoji).await
    }

    async fn remove_reaction(
        &self,
        handle: &MessageHandle,
        emoji: &str,
        user: UserId,
    ) -> Result<(), GatewayError> {
        self.client.remove_reaction(handle, emoji, user).await
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<Option<IncomingMessage>, GatewayError> {
        self.client.get_message(channel, message).await
    }

    async fn resolve_member(
        &self,
        guild: GuildId,
        user: UserId,
    ) -> Result<Option<Member>, GatewayError> {
        self.client.get_member(guild, user).await
    }

    async fn resolve_role(
        &self,
        guild: GuildId,
        role: RoleId,
    ) -> Result<Option<Role>, GatewayError> {
        self.client.get_role(guild, role).await
    }

    async fn resolve_channel(&self, channel: ChannelId) -> Result<Option<Channel>, GatewayError> {
        self.client.get_channel(channel).await
    }

    async fn resolve_guild(&self, guild: GuildId) -> Result<Option<GuildInfo>, GatewayError> {
        self.client.get_guild(guild).await
    }

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), GatewayError> {
        self.client.add_member_role(guild, user, role).await
    }

    async fn kick_member(&self, guild: GuildId, user: UserId) -> Result<(), GatewayError> {
        self.client.remove_member(guild, user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use gatekeeper_core::Embed;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorded {
        dm_opens: Arc<Mutex<u32>>,
        reactions: Arc<Mutex<Vec<String>>>,
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    async fn open_dm(State(rec): State<Recorded>) -> Json<serde_json::Value> {
        *rec.dm_opens.lock().unwrap() += 1;
        Json(json!({ "id": "555", "type": 1 }))
    }

    async fn create_message(
        State(rec): State<Recorded>,
        Path(channel): Path<String>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bot test-token") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        rec.bodies.lock().unwrap().push(body);
        Ok(Json(json!({ "id": "9001", "channel_id": channel })))
    }

    async fn react(
        State(rec): State<Recorded>,
        Path((_channel, _message, emoji)): Path<(String, String, String)>,
    ) -> StatusCode {
        rec.reactions.lock().unwrap().push(emoji);
        StatusCode::NO_CONTENT
    }

    async fn spawn_server() -> (String, Recorded) {
        let rec = Recorded::default();
        let app = Router::new()
            .route("/users/@me/channels", post(open_dm))
            .route("/channels/:channel/messages", post(create_message))
            .route(
                "/channels/:channel/messages/:message/reactions/:emoji/@me",
                put(react),
            )
            .route("/channels/403", get(|| async { StatusCode::FORBIDDEN }))
            .route(
                "/guilds/1/members/2",
                get(|| async {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({ "message": "Unknown Member", "code": 10007 })),
                    )
                }),
            )
            .route(
                "/guilds/1/roles",
                get(|| async {
                    Json(json!([
                        { "id": "10", "name": "Verified" },
                        { "id": "11", "name": "Seller" }
                    ]))
                }),
            )
            .route(
                "/guilds/1",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .with_state(rec.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), rec)
    }

    #[test]
    fn test_encode_emoji() {
        assert_eq!(encode_emoji("👍"), "%F0%9F%91%8D");
        assert_eq!(encode_emoji("abc"), "abc");
    }

    #[tokio::test]
    async fn test_dm_send_opens_channel_once() {
        let (base, rec) = spawn_server().await;
        let client = DiscordClient::new("test-token", base).unwrap();
        let gateway = DiscordGateway::new(client, Arc::new(ReplyBroker::new()));

        let first = gateway
            .send_message(Target::User(UserId(7)), Embed::notice("hello").into())
            .await
            .unwrap();
        let second = gateway
            .send_message(Target::User(UserId(7)), OutgoingMessage::content("again"))
            .await
            .unwrap();

        assert_eq!(first.channel_id, ChannelId(555));
        assert_eq!(first.message_id, MessageId(9001));
        assert_eq!(second.channel_id, ChannelId(555));
        assert_eq!(*rec.dm_opens.lock().unwrap(), 1);

        let bodies = rec.bodies.lock().unwrap();
        assert_eq!(bodies[0]["embeds"][0]["author"]["name"], "hello");
        assert_eq!(bodies[1]["content"], "again");
        assert!(bodies[1].get("embeds").is_none());
    }

    #[tokio::test]
    async fn test_reaction_emoji_round_trips_through_path() {
        let (base, rec) = spawn_server().await;
        let client = DiscordClient::new("test-token", base).unwrap();
        let handle = MessageHandle {
            channel_id: ChannelId(3),
            message_id: MessageId(4),
        };
        client.add_reaction(&handle, "🔁").await.unwrap();
        assert_eq!(rec.reactions.lock().unwrap().as_slice(), ["🔁".to_string()]);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (base, _rec) = spawn_server().await;
        let client = DiscordClient::new("test-token", base).unwrap();

        let denied = client.get_channel(ChannelId(403)).await.unwrap_err();
        assert_eq!(denied.denied_channel(), Some(ChannelId(403)));

        let missing = client.get_member(GuildId(1), UserId(2)).await.unwrap();
        assert!(missing.is_none());

        let role = client.get_role(GuildId(1), RoleId(11)).await.unwrap().unwrap();
        assert_eq!(role.name, "Seller");
        assert!(client.get_role(GuildId(1), RoleId(12)).await.unwrap().is_none());

        match client.get_guild(GuildId(1)).await {
            Err(GatewayError::Api { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected an API error, got {:?}", other),
        }
    }
}
