//! Startup reconciliation for crash recovery.
//!
//! A questionnaire lives in the memory of the process that asked it, so any
//! ticket still OPEN when the server starts belongs to a conversation nobody
//! is listening to anymore. Those tickets are closed and their members told
//! to start again. PENDING tickets survive a restart untouched: their queue
//! posts are persisted and the dispatcher picks them up where it left off.

use gatekeeper_core::{colours, Embed, TicketState};
use tracing::{debug, error, info, warn};

use crate::gateway::{Gateway, Target};
use crate::state_machine::repository::TicketRepository;
use crate::state_machine::{StoreError, TicketEvent, TicketStore};

pub const RESTART_NOTICE: &str = "⌛ Verification bot restarted!";
pub const RESTART_DETAIL: &str = "Please visit the server where you were verifying and try again.";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub malformed_deleted: usize,
    pub tickets_closed: usize,
}

/// Clean up after a previous instance.
///
/// Call after the repository is open and before the event ingress starts
/// accepting requests.
pub async fn reconcile_interrupted_tickets(
    store: &TicketStore,
    gateway: &dyn Gateway,
) -> ReconciliationReport {
    info!("Starting crash recovery reconciliation...");
    let mut report = ReconciliationReport::default();
    let repo = store.repository();

    match repo.delete_malformed().await {
        Ok(0) => {}
        Ok(count) => {
            warn!("Deleted {} malformed ticket record(s)", count);
            report.malformed_deleted = count;
        }
        Err(e) => error!("Failed to delete malformed tickets: {}", e),
    }

    let open = match repo.tickets_in_state(TicketState::Open).await {
        Ok(tickets) => tickets,
        Err(e) => {
            error!("Failed to list open tickets: {}", e);
            return report;
        }
    };

    if open.is_empty() {
        info!("No interrupted questionnaires found. Reconciliation complete.");
        return report;
    }

    info!(
        "Found {} ticket(s) left OPEN by a previous run, closing...",
        open.len()
    );

    for ticket in open {
        let key = ticket.key;
        match store.apply(&key, TicketEvent::Recovered).await {
            Ok(_) => report.tickets_closed += 1,
            Err(StoreError::Transition(e)) => {
                debug!("Ticket #{} moved on before recovery: {}", key.number, e);
                continue;
            }
            Err(e) => {
                error!("Failed to close ticket #{} in {}: {}", key.number, key.guild_id, e);
                continue;
            }
        }

        let notice = Embed::notice(RESTART_NOTICE)
            .with_description(RESTART_DETAIL)
            .with_color(colours::ORANGE);
        if let Err(e) = gateway
            .send_message(Target::User(key.user_id), notice.into())
            .await
        {
            debug!("Could not tell {} about the restart: {}", key.user_id, e);
        }
    }

    info!(
        "Reconciliation complete: {} closed, {} malformed removed",
        report.tickets_closed, report.malformed_deleted
    );
    report
}
