//! The finished questionnaire, as reviewed by moderators.
//!
//! A `Submission` renders into the preview embed the member sees and the
//! queue embed moderators react to. The dispatcher prefers the copy stored on
//! the ticket; `from_embed` recovers the same facts from a queue post for
//! tickets written before submissions were stored.

use serde::{Deserialize, Serialize};

use crate::answers::SellerLinks;
use crate::embed::{colours, Embed, EmbedAuthor, EmbedField, EmbedImage};
use crate::guild::DmPreference;
use crate::ids::UserId;
use crate::ticket::TicketNumber;

pub const SELLER_YES: &str = "✅";
pub const SELLER_NO: &str = "❌";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub age: u32,
    pub dm_preference: DmPreference,
    pub is_seller: bool,
    #[serde(default)]
    pub links: Option<SellerLinks>,
    /// Verification post in the configured subreddit.
    #[serde(default)]
    pub reddit_post: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl Submission {
    /// `Label: url` lines shown in the `Links` field and in seller announcements.
    pub fn link_lines(&self) -> Vec<String> {
        let links = self.links.clone().unwrap_or_default();
        [
            ("Onlyfans", links.onlyfans),
            ("Fansly", links.fansly),
            ("Reddit", self.reddit_post.clone()),
            ("Linktree", links.linktree),
        ]
        .into_iter()
        .filter_map(|(label, link)| link.map(|link| format!("{}: {}", label, link)))
        .collect()
    }

    /// Whether the seller verified through a post in `subreddit`.
    pub fn has_reddit_verification(&self, subreddit: &str) -> bool {
        let needle = format!("reddit.com/r/{}/", subreddit.to_lowercase());
        self.reddit_post
            .as_deref()
            .map(|post| post.to_lowercase().contains(&needle))
            .unwrap_or(false)
    }

    /// The embed the member sees before confirming.
    pub fn preview_embed(&self, number: TicketNumber) -> Embed {
        let mut fields = vec![
            EmbedField {
                name: "Age".to_string(),
                value: self.age.to_string(),
                inline: true,
            },
            EmbedField {
                name: "DM preferences".to_string(),
                value: self.dm_preference.label().to_string(),
                inline: true,
            },
            EmbedField {
                name: "Seller?".to_string(),
                value: if self.is_seller { SELLER_YES } else { SELLER_NO }.to_string(),
                inline: true,
            },
        ];

        let lines = self.link_lines();
        if self.is_seller && !lines.is_empty() {
            fields.push(EmbedField {
                name: "Links".to_string(),
                value: lines.join("\n"),
                inline: false,
            });
        }

        Embed {
            color: Some(colours::AQUA),
            author: Some(EmbedAuthor {
                name: self.display_name.clone(),
                icon_url: self.avatar_url.clone(),
            }),
            fields,
            image: self.photo_url.clone().map(|url| EmbedImage { url }),
            ..Default::default()
        }
        .with_footer(number.footer())
    }

    /// The preview enriched for moderators: a leading `Tag` field and a thumbnail.
    pub fn queue_embed(&self, member: UserId, number: TicketNumber) -> Embed {
        let mut embed = self.preview_embed(number);
        embed.fields.insert(
            0,
            EmbedField {
                name: "Tag".to_string(),
                value: member.mention(),
                inline: false,
            },
        );
        embed.thumbnail = self.avatar_url.clone().map(|url| EmbedImage { url });
        embed
    }

    /// Recover a submission from a queue post. Returns `None` without a
    /// parseable `Age` field.
    pub fn from_embed(embed: &Embed) -> Option<Self> {
        let age = embed.field("age")?.trim().parse().ok()?;
        let dm_preference = embed
            .field("dm preferences")
            .and_then(DmPreference::from_label)
            .unwrap_or(DmPreference::Closed);
        let is_seller = embed
            .field("seller?")
            .map(|value| value.contains(SELLER_YES))
            .unwrap_or(false);

        let mut links = SellerLinks::default();
        let mut reddit_post = None;
        for line in embed.field("links").unwrap_or_default().lines() {
            let Some((label, link)) = line.split_once(": ") else {
                continue;
            };
            let link = Some(link.trim().to_string());
            match label.trim().to_ascii_lowercase().as_str() {
                "onlyfans" => links.onlyfans = link,
                "fansly" => links.fansly = link,
                "reddit" => reddit_post = link,
                "linktree" => links.linktree = link,
                _ => {}
            }
        }

        Some(Self {
            display_name: embed
                .author
                .as_ref()
                .map(|author| author.name.clone())
                .unwrap_or_default(),
            avatar_url: embed.thumbnail.as_ref().map(|image| image.url.clone()),
            age,
            dm_preference,
            is_seller,
            links: if links.is_empty() { None } else { Some(links) },
            reddit_post,
            photo_url: embed.image.as_ref().map(|image| image.url.clone()),
        })
    }
}
