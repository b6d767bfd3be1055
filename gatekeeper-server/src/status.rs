//! Status endpoint.
//!
//! Reports how many tickets sit in each state plus one row per ticket, for
//! operators keeping an eye on the queue.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use gatekeeper_core::{Ticket, TicketState};
use serde::Serialize;

use crate::state_machine::repository::TicketRepository;
use crate::AppState;

/// Ticket counts by state.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub total_tickets: usize,
    pub open: usize,
    pub pending: usize,
    pub pending_redo: usize,
    pub closed: usize,
    pub verified: usize,
    pub denied: usize,
}

#[derive(Debug, Serialize)]
pub struct TicketStatusEntry {
    pub guild_id: String,
    pub user_id: String,
    pub ticket: String,
    pub state: TicketState,
    pub step: u32,
    pub has_submission: bool,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub tickets: Vec<TicketStatusEntry>,
}

impl StatusData {
    /// Build the report. Rows come out most recently updated first.
    pub fn from_tickets(mut tickets: Vec<Ticket>, version: String) -> Self {
        let mut summary = StatusSummary {
            total_tickets: tickets.len(),
            ..Default::default()
        };

        tickets.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let mut rows = Vec::with_capacity(tickets.len());

        for ticket in tickets {
            match ticket.state {
                TicketState::Open => summary.open += 1,
                TicketState::Pending => summary.pending += 1,
                TicketState::PendingRedo => summary.pending_redo += 1,
                TicketState::Closed => summary.closed += 1,
                TicketState::Verified => summary.verified += 1,
                TicketState::Denied => summary.denied += 1,
            }

            rows.push(TicketStatusEntry {
                guild_id: ticket.key.guild_id.to_string(),
                user_id: ticket.key.user_id.to_string(),
                ticket: ticket.key.number.to_string(),
                state: ticket.state,
                step: ticket.step,
                has_submission: ticket.submission.is_some(),
                updated_at: ticket.updated_at,
            });
        }

        Self {
            version,
            summary,
            tickets: rows,
        }
    }
}

/// Check the bearer token against `STATUS_AUTH_TOKEN`.
#[allow(clippy::result_large_err)] // Response is large but this is idiomatic in Axum handlers
fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    // No token configured means the endpoint is off.
    let Some(expected_token) = auth_token else {
        return Err((
            StatusCode::FORBIDDEN,
            "Status endpoint is disabled (STATUS_AUTH_TOKEN not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided_token) if provided_token == expected_token => Ok(()),
            Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
            None => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header format. Expected: Bearer <token>",
            )
                .into_response()),
        },
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

/// Handler: GET /status
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusData>, Response> {
    validate_auth(&headers, &state.status_auth_token)?;

    let tickets = state.store.repository().all_tickets().await.map_err(|e| {
        tracing::error!("Failed to list tickets for status: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to query tickets").into_response()
    })?;

    Ok(Json(StatusData::from_tickets(
        tickets,
        crate::get_bot_version(),
    )))
}
