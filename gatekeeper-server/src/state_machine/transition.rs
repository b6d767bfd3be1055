//! Pure ticket transition function.
//!
//! `transition` has no side effects. The store applies its result with a
//! compare-and-set so two concurrent events cannot both win.

use gatekeeper_core::{TicketKey, TicketState};
use thiserror::Error;

use super::event::TicketEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{event} is not allowed for a {from} ticket")]
    NotAllowed {
        from: TicketState,
        event: TicketEvent,
    },
    #[error("ticket {0} does not exist")]
    Missing(TicketKey),
    #[error("ticket {key} changed state while applying {event}")]
    Conflict { key: TicketKey, event: TicketEvent },
}

/// The state a ticket in `from` moves to on `event`.
pub fn transition(from: TicketState, event: TicketEvent) -> Result<TicketState, TransitionError> {
    use TicketEvent::*;
    use TicketState::*;

    match (from, event) {
        (Open, QuestionnaireCompleted) => Ok(Pending),
        (Open, Abandoned | MemberLeft | Recovered) => Ok(Closed),
        (Open, PolicyDenied) => Ok(TicketState::Denied),

        (Pending, Approved) => Ok(Verified),
        (Pending, RedoRequested) => Ok(PendingRedo),
        (Pending, TicketEvent::Denied) => Ok(TicketState::Denied),
        (Pending, ImageMissing) => Ok(Closed),
        // Nobody is left to decide for; the queue post goes with it.
        (Pending, MemberLeft) => Ok(Closed),

        (PendingRedo, Superseded) => Ok(Closed),

        _ => Err(TransitionError::NotAllowed { from, event }),
    }
}
