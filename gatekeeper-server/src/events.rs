//! Event ingress.
//!
//! A gateway relay holds the websocket connection to Discord and forwards
//! each event here as signed JSON. Every accepted event is processed in its
//! own task, so one slow questionnaire never holds up another member.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use gatekeeper_core::GuildId;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::gateway::{IncomingMessage, User};
use crate::moderation::{Dispatch, ReactionEvent};
use crate::verification::is_start_command;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-signature-256";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Ready,
    MessageCreated { message: IncomingMessage },
    ReactionAdded { reaction: ReactionEvent },
    MemberJoined { guild_id: GuildId, user: User },
    MemberLeft { guild_id: GuildId, user: User },
    Error { message: String },
}

impl GatewayEvent {
    fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::Ready => "ready",
            GatewayEvent::MessageCreated { .. } => "message_created",
            GatewayEvent::ReactionAdded { .. } => "reaction_added",
            GatewayEvent::MemberJoined { .. } => "member_joined",
            GatewayEvent::MemberLeft { .. } => "member_left",
            GatewayEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub message: String,
    pub event_id: String,
}

type HmacSha256 = Hmac<Sha256>;

fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison.
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_event_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            warn!("Rejected event without a signature");
            StatusCode::UNAUTHORIZED
        })?;

    if !verify_signature(&state.event_secret, &bytes, signature) {
        error!("Invalid event signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(request).await)
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<EventResponse>), StatusCode> {
    let event: GatewayEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!("Failed to parse gateway event: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    let event_id = Uuid::new_v4().to_string();
    debug!("Accepted {} event {}", event.kind(), event_id);

    tokio::spawn(async move {
        process_event(&state, event).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(EventResponse {
            message: "Event accepted".to_string(),
            event_id,
        }),
    ))
}

/// Handle one gateway event to completion.
pub async fn process_event(state: &AppState, event: GatewayEvent) {
    match event {
        GatewayEvent::Ready => info!("Gateway relay is ready"),
        GatewayEvent::Error { message } => error!("Gateway relay reported an error: {}", message),
        GatewayEvent::MessageCreated { message } => handle_message(state, message).await,
        GatewayEvent::ReactionAdded { reaction } => {
            match state.moderation.handle_reaction(&reaction).await {
                Dispatch::Ignored => {}
                outcome => debug!("Reaction on {}: {:?}", reaction.message_id, outcome),
            }
        }
        GatewayEvent::MemberJoined { guild_id, user } => {
            if user.bot {
                return;
            }
            info!("{} joined {}", user.id, guild_id);
            match state.verification.start_for_member(guild_id, &user).await {
                Ok(outcome) => info!("Verification of {} in {}: {:?}", user.id, guild_id, outcome),
                Err(e) => debug!("Verification of {} in {} stopped: {}", user.id, guild_id, e),
            }
        }
        GatewayEvent::MemberLeft { guild_id, user } => {
            match state.moderation.handle_member_left(guild_id, user.id).await {
                Ok(Some(key)) => info!("Closed ticket #{} after {} left", key.number, user.id),
                Ok(None) => {}
                Err(e) => error!("Failed to handle {} leaving {}: {}", user.id, guild_id, e),
            }
        }
    }
}

async fn handle_message(state: &AppState, message: IncomingMessage) {
    if message.author.bot {
        return;
    }
    if state.replies.offer(&message) {
        return;
    }
    if !message.is_direct() || !is_start_command(&message.content) {
        return;
    }
    // A member mid-questionnaire answers "start" to a question, not to us.
    if state.leases.is_held(message.author.id) {
        return;
    }

    let user = message.author.id;
    match state.verification.start_from_dm(message).await {
        Ok(outcome) => info!("Verification of {} from DM: {:?}", user, outcome),
        Err(e) => debug!("Verification of {} from DM stopped: {}", user, e),
    }
}

pub fn events_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(events_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_event_signature,
        ))
}
