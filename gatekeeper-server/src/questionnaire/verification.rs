//! The verification questionnaire: the questions and the typed views of
//! their answers.
//!
//! A verification runs these sets in order on one session: `base_questions`,
//! then `seller_questions` for self-identified sellers, then the photo and,
//! after the preview, the confirmation.

use std::sync::Arc;

use gatekeeper_core::{answers, Answer, GuildId, SellerLinks};

use super::reddit::{PostLookup, RedditPostValidator};
use super::Question;
use crate::gateway::{GuildInfo, IncomingMessage};

fn yes_no(prompt: &str) -> Question {
    Question::new(
        prompt,
        |reply, _| answers::parse_yes_no(&reply.content).is_some(),
        |reply, _| Answer::Flag(answers::parse_yes_no(&reply.content).unwrap_or(false)),
    )
}

fn first_image(reply: &IncomingMessage) -> Option<&str> {
    reply
        .attachments
        .iter()
        .map(|attachment| attachment.url.as_str())
        .find(|url| answers::is_image_url(url))
}

/// Avatar, age, the two DM questions, seller.
pub fn base_questions() -> Vec<Question> {
    vec![
        Question::new(
            "Please set a profile image before continuing with this verification!\n\
             Click [here](https://support.discord.com/hc/en-us/articles/204156688-How-do-I-change-my-avatar-) for more information.\n\
             Once done reply here and I'll check. :smiley:",
            |reply, _| reply.author.avatar.is_some(),
            |reply, _| {
                reply
                    .author
                    .avatar_url()
                    .map(Answer::Text)
                    .unwrap_or(Answer::Skipped)
            },
        )
        .with_emoji("❌")
        .with_failure("No profile image detected!")
        .skip_when(|context, _| context.author.avatar.is_some()),
        Question::new(
            "How old are you?",
            |reply, _| answers::parse_age(&reply.content).is_some(),
            |reply, _| {
                answers::parse_age(&reply.content)
                    .map(Answer::Number)
                    .unwrap_or(Answer::Skipped)
            },
        ),
        yes_no("Do you want people to DM you?"),
        yes_no("Do you want people to ask permission before DMing you?")
            .skip_when(|_, previous| previous.and_then(Answer::as_flag) == Some(false)),
        yes_no("Do you sell adult (NSFW) content?"),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseAnswers {
    pub avatar_url: Option<String>,
    pub age: u32,
    pub allows_dms: bool,
    pub ask_first: bool,
    pub is_seller: bool,
}

impl BaseAnswers {
    pub const LEN: usize = 5;

    pub fn from_answers(answers: &[Answer]) -> Option<Self> {
        let [avatar, age, allows_dms, ask_first, is_seller] = answers else {
            return None;
        };
        let allows_dms = allows_dms.as_flag()?;
        Some(Self {
            avatar_url: avatar.as_text().map(str::to_string),
            age: age.as_number()?,
            allows_dms,
            ask_first: allows_dms && ask_first.as_flag().unwrap_or(false),
            is_seller: is_seller.as_flag()?,
        })
    }
}

/// Storefront links, then a verification post when a reddit link was given.
pub fn seller_questions(
    guild_name: &str,
    subreddit: &str,
    lookup: Arc<dyn PostLookup>,
) -> Vec<Question> {
    let post_subreddit = subreddit.to_string();
    vec![
        Question::new(
            "Please provide links to all your sites. (reddit, onlyfans, fansly and linktree)",
            |reply, _| SellerLinks::from_reply(&reply.content).is_some(),
            |reply, _| Answer::Links(SellerLinks::from_reply(&reply.content).unwrap_or_default()),
        )
        .with_failure("No onlyfans, fansly, reddit or linktree links found!"),
        Question::with_validator(
            format!(
                "Please post a photo to /r/{} with the title \"[OC] Verifying for {}\". \
                 Make sure to set the flair to \"verification\". \
                 After you're done reply here with the link.",
                subreddit, guild_name
            ),
            RedditPostValidator::new(subreddit, lookup),
            move |reply, _| {
                answers::reddit_post_link(&reply.content, &post_subreddit)
                    .map(Answer::Text)
                    .unwrap_or(Answer::Skipped)
            },
        )
        .with_failure("Invalid link!")
        .skip_when(|_, previous| {
            previous
                .and_then(Answer::as_links)
                .map(|links| links.reddit.is_none())
                .unwrap_or(true)
        }),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerAnswers {
    pub links: SellerLinks,
    pub reddit_post: Option<String>,
}

impl SellerAnswers {
    pub const LEN: usize = 2;

    pub fn from_answers(answers: &[Answer]) -> Option<Self> {
        let [links, post] = answers else {
            return None;
        };
        Some(Self {
            links: links.as_links()?.clone(),
            reddit_post: post.as_text().map(str::to_string),
        })
    }
}

pub fn photo_question(guild_name: &str) -> Question {
    Question::new(
        format!(
            "Please send a photo of yourself holding a piece of paper with \"I'm joining {}\", \
             today's date and your discord username.\n\n\
             Note: This image will seen **ONLY** by mods and deleted once your verification \
             has been approved/denied.",
            guild_name
        ),
        |reply, _| first_image(reply).is_some(),
        |reply, _| {
            first_image(reply)
                .map(|url| Answer::Text(url.to_string()))
                .unwrap_or(Answer::Skipped)
        },
    )
    .with_emoji("📸")
    .with_failure("Please attach a jpg or png photo!")
}

pub fn confirmation_question() -> Question {
    yes_no("Are you sure you want to submit this verification?")
}

fn match_guild<'g>(guilds: &'g [GuildInfo], reply: &str) -> Option<&'g GuildInfo> {
    let reply = reply.trim().to_lowercase();
    if reply.is_empty() {
        return None;
    }
    guilds
        .iter()
        .find(|guild| guild.name.to_lowercase() == reply)
        .or_else(|| {
            guilds
                .iter()
                .find(|guild| guild.name.to_lowercase().contains(&reply))
        })
}

/// Ask which of `guilds` a DM start is for. The answer holds the guild id.
pub fn guild_choice_question(guilds: &[GuildInfo]) -> Question {
    let names = guilds
        .iter()
        .map(|guild| format!("• {}", guild.name))
        .collect::<Vec<_>>()
        .join("\n");
    let for_validate: Arc<[GuildInfo]> = guilds.into();
    let for_format = for_validate.clone();

    Question::new(
        format!("Which server are you verifying for?\n{}", names),
        move |reply, _| match_guild(&for_validate, &reply.content).is_some(),
        move |reply, _| {
            match_guild(&for_format, &reply.content)
                .map(|guild| Answer::Text(guild.id.to_string()))
                .unwrap_or(Answer::Skipped)
        },
    )
    .with_failure("I don't know that server, try again!")
}

pub fn chosen_guild(answer: &Answer) -> Option<GuildId> {
    answer.as_text()?.parse().ok()
}
