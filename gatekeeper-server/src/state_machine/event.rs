//! Events that move a ticket between states.
//!
//! Events come from the verification flow, moderator reactions, membership
//! changes and startup reconciliation. They are inputs to the pure
//! `transition` function.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketEvent {
    // =========================================================================
    // Verification flow
    // =========================================================================
    /// Every question answered and the submission confirmed.
    QuestionnaireCompleted,
    /// Timed out, cancelled, or turned away by the guild's seller policy.
    Abandoned,
    /// A non-seller applied to a sellers-only guild.
    PolicyDenied,
    /// A new ticket replaced one waiting on a redo.
    Superseded,

    // =========================================================================
    // Moderator reactions
    // =========================================================================
    Approved,
    RedoRequested,
    Denied,
    /// The photo did not come through; the member must start over.
    ImageMissing,

    // =========================================================================
    // Membership and process lifecycle
    // =========================================================================
    MemberLeft,
    /// Found OPEN at startup, left behind by a previous process.
    Recovered,
}

impl TicketEvent {
    pub const ALL: [TicketEvent; 10] = [
        TicketEvent::QuestionnaireCompleted,
        TicketEvent::Abandoned,
        TicketEvent::PolicyDenied,
        TicketEvent::Superseded,
        TicketEvent::Approved,
        TicketEvent::RedoRequested,
        TicketEvent::Denied,
        TicketEvent::ImageMissing,
        TicketEvent::MemberLeft,
        TicketEvent::Recovered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketEvent::QuestionnaireCompleted => "questionnaire_completed",
            TicketEvent::Abandoned => "abandoned",
            TicketEvent::PolicyDenied => "policy_denied",
            TicketEvent::Superseded => "superseded",
            TicketEvent::Approved => "approved",
            TicketEvent::RedoRequested => "redo_requested",
            TicketEvent::Denied => "denied",
            TicketEvent::ImageMissing => "image_missing",
            TicketEvent::MemberLeft => "member_left",
            TicketEvent::Recovered => "recovered",
        }
    }

    /// Events only a moderator reaction produces.
    pub fn is_moderation(self) -> bool {
        matches!(
            self,
            TicketEvent::Approved
                | TicketEvent::RedoRequested
                | TicketEvent::Denied
                | TicketEvent::ImageMissing
        )
    }
}

impl fmt::Display for TicketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
