//! Outgoing message and embed model.
//!
//! The field names match the Discord REST JSON so these types serialize
//! directly into request bodies and deserialize from message payloads.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::ids::UserId;
use crate::ticket::TicketNumber;

/// Embed side-bar colours.
pub mod colours {
    pub const AQUA: u32 = 1_752_220;
    pub const RED: u32 = 15_158_332;
    pub const GREEN: u32 = 3_066_993;
    pub const ORANGE: u32 = 15_105_570;
    pub const BLURPLE: u32 = 7_506_394;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<EmbedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

impl Embed {
    /// A notice whose text sits in the author line, the bot's usual one-liner.
    pub fn notice(author: impl Into<String>) -> Self {
        Self {
            color: Some(colours::BLURPLE),
            author: Some(EmbedAuthor {
                name: author.into(),
                icon_url: None,
            }),
            ..Default::default()
        }
    }

    pub fn text(description: impl Into<String>) -> Self {
        Self {
            color: Some(colours::BLURPLE),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    /// Case-insensitive field lookup by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Ticket number from a `Ticket #<digits>` footer.
    pub fn ticket_number(&self) -> Option<TicketNumber> {
        self.footer
            .as_ref()
            .and_then(|footer| parse_ticket_footer(&footer.text))
    }

    /// Member referenced by the `Tag` field of a queue post.
    pub fn tagged_member(&self) -> Option<UserId> {
        self.field("tag").and_then(parse_member_mention)
    }
}

fn footer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Ticket #([0-9]+)").expect("footer regex is valid"))
}

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<@!?(\d+)>").expect("mention regex is valid"))
}

pub fn parse_ticket_footer(text: &str) -> Option<TicketNumber> {
    let caps = footer_pattern().captures(text)?;
    caps.get(1)?.as_str().parse::<u64>().ok().map(TicketNumber)
}

pub fn parse_member_mention(text: &str) -> Option<UserId> {
    let caps = mention_pattern().captures(text)?;
    caps.get(1)?.as_str().parse::<u64>().ok().map(UserId)
}

/// Body of a message the bot sends or edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

impl OutgoingMessage {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embeds: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// First embed, which is where every bot message keeps its payload.
    pub fn embed(&self) -> Option<&Embed> {
        self.embeds.first()
    }
}

impl From<Embed> for OutgoingMessage {
    fn from(embed: Embed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
        }
    }
}
