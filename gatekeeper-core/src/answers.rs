//! Answer values and the parsers that turn free-text replies into them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

use crate::ids::UserId;

/// A formatted answer as stored on a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Text(String),
    Number(u32),
    Flag(bool),
    Links(SellerLinks),
    /// The question did not apply and was skipped without a value.
    Skipped,
}

impl Answer {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Answer::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            Answer::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Answer::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_links(&self) -> Option<&SellerLinks> {
        match self {
            Answer::Links(links) => Some(links),
            _ => None,
        }
    }
}

const YES_NO_WORDS: [&str; 10] = [
    "yes", "no", "1", "0", "true", "false", "yep", "okay", "nah", "nope",
];
const TRUTHY_WORDS: [&str; 5] = ["yes", "okay", "1", "true", "yep"];

/// Parse a yes/no style reply. Returns `None` for anything unrecognised.
pub fn parse_yes_no(reply: &str) -> Option<bool> {
    let normalized = reply.trim().to_lowercase();
    if !YES_NO_WORDS.contains(&normalized.as_str()) {
        return None;
    }
    Some(TRUTHY_WORDS.contains(&normalized.as_str()))
}

fn age_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(1[89]|[2-9][0-9])\b").expect("age regex is valid"))
}

/// First standalone number between 18 and 99 in the reply.
pub fn parse_age(reply: &str) -> Option<u32> {
    age_pattern()
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Links a seller provides to their storefronts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onlyfans: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fansly: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reddit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linktree: Option<String>,
}

impl SellerLinks {
    /// Pick the recognised storefront links out of a reply.
    ///
    /// Returns `None` when the reply contains no recognised link.
    pub fn from_reply(reply: &str) -> Option<Self> {
        let links = extract_urls(reply);
        let find = |needles: &[&str]| {
            links
                .iter()
                .find(|link| needles.iter().any(|needle| link.contains(needle)))
                .cloned()
        };

        let parsed = Self {
            onlyfans: find(&["onlyfans.com"]),
            fansly: find(&["fansly.com"]),
            reddit: find(&["reddit.com"]),
            linktree: find(&["linktree.com", "linktr.ee"]),
        };

        if parsed.is_empty() {
            None
        } else {
            Some(parsed)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.onlyfans.is_none()
            && self.fansly.is_none()
            && self.reddit.is_none()
            && self.linktree.is_none()
    }
}

/// URL-looking tokens in free text, normalised to absolute URLs.
///
/// Bare domains (`onlyfans.com/me`) are accepted and given an `https://`
/// scheme, the way chat clients auto-link them.
pub fn extract_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| "<>()[]{},;\"'".contains(c)))
        .filter(|token| token.contains('.'))
        .filter_map(|token| {
            let candidate = if token.contains("://") {
                token.to_string()
            } else {
                format!("https://{}", token)
            };
            let parsed = Url::parse(&candidate).ok()?;
            let host = parsed.host_str()?;
            if !host.contains('.') {
                return None;
            }
            Some(parsed.to_string().to_lowercase())
        })
        .collect()
}

/// A link to a post in `subreddit`, trimmed to `https://www.reddit.com/r/<sub>/comments/<id>`.
pub fn reddit_post_link(reply: &str, subreddit: &str) -> Option<String> {
    let pattern = format!(
        r"(?i)https://(?:www\.)?reddit\.com/r/{}/comments/[a-z0-9]+",
        regex::escape(subreddit)
    );
    let re = Regex::new(&pattern).ok()?;
    re.find(reply).map(|m| m.as_str().to_string())
}

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Whether an attachment URL points at a jpg/jpeg/png, ignoring any query string.
pub fn is_image_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// CDN URL for a user's avatar hash.
pub fn avatar_url(user_id: UserId, avatar_hash: &str) -> String {
    format!(
        "https://cdn.discordapp.com/avatars/{}/{}.jpg",
        user_id, avatar_hash
    )
}
