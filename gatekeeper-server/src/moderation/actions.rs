use std::fmt;

use crate::state_machine::TicketEvent;

/// Reactions the bot adds to every queue post, in order.
pub const QUEUE_REACTIONS: [&str; 4] = ["👍", "🔁", "👎", "🖼️"];

/// What a moderator's reaction on a queue post asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModerationAction {
    Approve,
    Redo,
    Deny,
    MissingImage,
}

impl ModerationAction {
    pub const ALL: [ModerationAction; 4] = [
        ModerationAction::Approve,
        ModerationAction::Redo,
        ModerationAction::Deny,
        ModerationAction::MissingImage,
    ];

    pub fn from_emoji(emoji: &str) -> Option<Self> {
        // Clients send the framed picture with or without the variation selector.
        match emoji.trim_end_matches('\u{fe0f}') {
            "👍" => Some(ModerationAction::Approve),
            "🔁" => Some(ModerationAction::Redo),
            "👎" => Some(ModerationAction::Deny),
            "🖼" => Some(ModerationAction::MissingImage),
            _ => None,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            ModerationAction::Approve => QUEUE_REACTIONS[0],
            ModerationAction::Redo => QUEUE_REACTIONS[1],
            ModerationAction::Deny => QUEUE_REACTIONS[2],
            ModerationAction::MissingImage => QUEUE_REACTIONS[3],
        }
    }

    pub fn event(self) -> TicketEvent {
        match self {
            ModerationAction::Approve => TicketEvent::Approved,
            ModerationAction::Redo => TicketEvent::RedoRequested,
            ModerationAction::Deny => TicketEvent::Denied,
            ModerationAction::MissingImage => TicketEvent::ImageMissing,
        }
    }
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModerationAction::Approve => "approve",
            ModerationAction::Redo => "redo",
            ModerationAction::Deny => "deny",
            ModerationAction::MissingImage => "missing image",
        };
        f.write_str(name)
    }
}
