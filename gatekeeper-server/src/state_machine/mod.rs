//! Ticket lifecycle.
//!
//! - **Events**: what happened to a ticket (`TicketEvent`)
//! - **Transition**: pure `(TicketState, TicketEvent) -> TicketState`
//! - **Store**: applies transitions against the repository with compare-and-set
//! - **Repository**: persistence for tickets, guild configs and the queue watch set

pub mod event;
pub mod repository;
pub mod store;
pub mod transition;

pub use event::TicketEvent;
pub use store::{OpenOutcome, StoreError, TicketStore};
pub use transition::{transition, TransitionError};
