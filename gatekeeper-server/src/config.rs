use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::discord::DEFAULT_API_BASE;
use crate::verification::{DEFAULT_REPLY_TIMEOUT, DEFAULT_SUBREDDIT};

#[derive(Clone)]
pub struct Config {
    pub discord_bot_token: String,
    /// Shared secret the gateway relay signs event bodies with.
    pub gateway_event_secret: String,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    pub discord_api_base: String,
    /// How long the bot waits for each questionnaire answer.
    pub reply_timeout: Duration,
    /// Where sellers post their verification picture.
    pub verification_subreddit: String,
    /// Optional bearer token for /status endpoint authentication.
    /// If set, requests to /status must include `Authorization: Bearer <token>`.
    /// If not set, /status endpoint is disabled (returns 403 Forbidden).
    pub status_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let discord_bot_token = env::var("DISCORD_BOT_TOKEN")
            .context("DISCORD_BOT_TOKEN environment variable is required")?;

        let gateway_event_secret = env::var("GATEWAY_EVENT_SECRET")
            .context("GATEWAY_EVENT_SECRET environment variable is required")?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let discord_api_base = parse_optional(env::var("DISCORD_API_BASE").ok())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let reply_timeout = match parse_optional(env::var("REPLY_TIMEOUT_SECS").ok()) {
            Some(secs) => Duration::from_secs(
                secs.trim()
                    .parse::<u64>()
                    .context("REPLY_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            None => DEFAULT_REPLY_TIMEOUT,
        };

        let verification_subreddit = parse_optional(env::var("VERIFICATION_SUBREDDIT").ok())
            .map(|s| s.trim().trim_start_matches("r/").to_string())
            .unwrap_or_else(|| DEFAULT_SUBREDDIT.to_string());

        let status_auth_token = parse_status_auth_token(env::var("STATUS_AUTH_TOKEN").ok());

        Ok(Config {
            discord_bot_token,
            gateway_event_secret,
            port,
            state_dir,
            discord_api_base,
            reply_timeout,
            verification_subreddit,
            status_auth_token,
        })
    }
}

/// Treat missing, empty and whitespace-only values alike.
fn parse_optional(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace.
/// This prevents security issues where an empty token would allow unauthenticated access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    parse_optional(value)
}
