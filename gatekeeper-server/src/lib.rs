pub mod config;
pub mod events;
pub mod gateway;
pub mod leases;
pub mod moderation;
pub mod questionnaire;
pub mod reconciliation;
pub mod state_machine;
pub mod status;
pub mod verification;

use std::sync::Arc;

use gateway::{Gateway, ReplyBroker};
use leases::ReplyLeases;
use moderation::ModerationDispatcher;
use questionnaire::reddit::PostLookup;
use state_machine::repository::Repository;
use state_machine::TicketStore;
use verification::{FlowSettings, VerificationFlow};

pub fn get_bot_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub struct AppState {
    pub gateway: Arc<dyn Gateway>,
    pub replies: Arc<ReplyBroker>,
    pub leases: Arc<ReplyLeases>,
    pub store: TicketStore,
    pub verification: VerificationFlow,
    pub moderation: ModerationDispatcher,
    pub event_secret: String,
    /// Bearer token for `/status`. `None` disables the endpoint.
    pub status_auth_token: Option<String>,
}

impl AppState {
    /// Wire the flow and the dispatcher over one gateway and one repository.
    ///
    /// `replies` must be the broker the gateway's `await_reply` reads from,
    /// or replies offered by the event ingress will never reach a waiter.
    pub fn new(
        gateway: Arc<dyn Gateway>,
        replies: Arc<ReplyBroker>,
        repository: Arc<dyn Repository>,
        reddit: Arc<dyn PostLookup>,
        flow_settings: FlowSettings,
        event_secret: String,
        status_auth_token: Option<String>,
    ) -> Self {
        let store = TicketStore::new(repository);
        let leases = ReplyLeases::new();
        let verification = VerificationFlow::new(
            gateway.clone(),
            store.clone(),
            leases.clone(),
            reddit,
            flow_settings.clone(),
        );
        let moderation = ModerationDispatcher::new(
            gateway.clone(),
            store.clone(),
            moderation::ModerationSettings {
                subreddit: flow_settings.subreddit,
                ..Default::default()
            },
        );
        Self {
            gateway,
            replies,
            leases,
            store,
            verification,
            moderation,
            event_secret,
            status_auth_token,
        }
    }
}
