//! Checks a seller's verification post on reddit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use gatekeeper_core::{answers, Answer};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error};

use super::{Validation, Validator};
use crate::gateway::IncomingMessage;

/// Who posted a reddit post, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetails {
    pub author: String,
    pub subreddit: String,
}

#[async_trait]
pub trait PostLookup: Send + Sync {
    async fn post_details(&self, link: &str) -> Result<PostDetails>;
}

/// Pull the first post's author and subreddit out of a `<post>.json` listing.
pub fn parse_listing(listing: &Value) -> Option<PostDetails> {
    let post = listing.get(0)?.pointer("/data/children/0/data")?;
    Some(PostDetails {
        author: post.get("author")?.as_str()?.to_string(),
        subreddit: post.get("subreddit")?.as_str()?.to_string(),
    })
}

#[derive(Clone)]
pub struct RedditClient {
    client: Client,
}

impl RedditClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gatekeeper/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build reddit HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PostLookup for RedditClient {
    async fn post_details(&self, link: &str) -> Result<PostDetails> {
        let url = format!("{}.json", link.trim_end_matches('/'));
        debug!("Fetching reddit post {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send reddit post request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("Reddit post lookup failed: {} - {}", status, error_text);
            return Err(anyhow!("reddit returned {}", status));
        }

        let listing: Value = response
            .json()
            .await
            .context("Failed to parse reddit post response")?;
        parse_listing(&listing).ok_or_else(|| anyhow!("reddit post has no author or subreddit"))
    }
}

/// Accepts a link to a post in the configured subreddit, made from the
/// poster's account rather than their profile.
pub struct RedditPostValidator {
    subreddit: String,
    lookup: Arc<dyn PostLookup>,
}

impl RedditPostValidator {
    pub fn new(subreddit: impl Into<String>, lookup: Arc<dyn PostLookup>) -> Self {
        Self {
            subreddit: subreddit.into(),
            lookup,
        }
    }
}

#[async_trait]
impl Validator for RedditPostValidator {
    async fn validate(
        &self,
        reply: &IncomingMessage,
        _previous: Option<&Answer>,
    ) -> Result<Validation> {
        let Some(link) = answers::reddit_post_link(&reply.content, &self.subreddit) else {
            return Ok(Validation::Invalid);
        };

        let post = self.lookup.post_details(&link).await?;
        if post
            .subreddit
            .eq_ignore_ascii_case(&format!("u_{}", post.author))
        {
            return Ok(Validation::Rejected(format!(
                "Please make the post in /r/{}, not /u/{}",
                self.subreddit, post.author
            )));
        }
        if !post.subreddit.eq_ignore_ascii_case(&self.subreddit) {
            return Ok(Validation::Rejected(format!(
                "Please make the post in /r/{}, not /r/{}",
                self.subreddit, post.subreddit
            )));
        }
        Ok(Validation::Valid)
    }
}
