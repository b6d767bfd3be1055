//! Audit-log entries.

use gatekeeper_core::{colours, Embed, TicketNumber, TicketState, UserId};

pub const TICKET_STATE_FIELD: &str = "Ticket State";

/// The queue post as a permanent record: no photo, plus the ticket's state.
pub fn decision_entry(queue_post: &Embed, state: TicketState) -> Embed {
    let mut entry = queue_post.clone();
    entry.image = None;
    entry.with_field(TICKET_STATE_FIELD, state.as_str(), true)
}

/// Recorded when a member with an unfinished ticket leaves the guild.
pub fn member_left_entry(user: UserId, number: TicketNumber) -> Embed {
    Embed::notice("Member has left the guild")
        .with_color(colours::AQUA)
        .with_field("Tag", user.mention(), false)
        .with_field(TICKET_STATE_FIELD, TicketState::Closed.as_str(), true)
        .with_footer(number.footer())
}
