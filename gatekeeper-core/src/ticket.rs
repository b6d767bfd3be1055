//! Ticket identity, lifecycle states and the persisted ticket record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::answers::Answer;
use crate::ids::{GuildId, UserId};
use crate::submission::Submission;

/// Width tickets are zero-padded to when shown to people.
pub const TICKET_NUMBER_PADDING: usize = 5;

/// Per-guild ticket sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(pub u64);

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = TICKET_NUMBER_PADDING)
    }
}

impl TicketNumber {
    /// Footer text that the reaction dispatcher parses back.
    pub fn footer(self) -> String {
        format!("Ticket #{}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketKind {
    Verification,
    BanAppeal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketState {
    Open,
    Pending,
    PendingRedo,
    Closed,
    Verified,
    Denied,
}

impl TicketState {
    pub const ALL: [TicketState; 6] = [
        TicketState::Open,
        TicketState::Pending,
        TicketState::PendingRedo,
        TicketState::Closed,
        TicketState::Verified,
        TicketState::Denied,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketState::Open => "OPEN",
            TicketState::Pending => "PENDING",
            TicketState::PendingRedo => "PENDING_REDO",
            TicketState::Closed => "CLOSED",
            TicketState::Verified => "VERIFIED",
            TicketState::Denied => "DENIED",
        }
    }

    /// States of which a user may hold at most one per guild.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TicketState::Open | TicketState::Pending | TicketState::PendingRedo
        )
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTicketState(pub String);

impl fmt::Display for UnknownTicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown ticket state {:?}", self.0)
    }
}

impl std::error::Error for UnknownTicketState {}

impl FromStr for TicketState {
    type Err = UnknownTicketState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        TicketState::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| UnknownTicketState(s.to_string()))
    }
}

/// Identity of a ticket: `(guild, user, number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketKey {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub number: TicketNumber,
}

impl TicketKey {
    pub fn new(guild_id: GuildId, user_id: UserId, number: TicketNumber) -> Self {
        Self {
            guild_id,
            user_id,
            number,
        }
    }

    /// Snowflakes are never zero, so a zero component means the record was
    /// written without its guild or member.
    pub fn is_malformed(&self) -> bool {
        self.guild_id.0 == 0 || self.user_id.0 == 0
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.guild_id, self.user_id, self.number)
    }
}

/// Persisted ticket record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub key: TicketKey,
    pub kind: TicketKind,
    pub state: TicketState,
    /// Index of the question currently being asked; survives restarts.
    #[serde(default)]
    pub step: u32,
    /// Formatted answers keyed by question index.
    #[serde(default)]
    pub answers: BTreeMap<u32, Answer>,
    #[serde(default)]
    pub submission: Option<Submission>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Ticket {
    pub fn open(key: TicketKey, kind: TicketKind, now: i64) -> Self {
        Self {
            key,
            kind,
            state: TicketState::Open,
            step: 0,
            answers: BTreeMap::new(),
            submission: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ticket_number_is_zero_padded() {
        assert_eq!(TicketNumber(42).to_string(), "00042");
        assert_eq!(TicketNumber(123456).to_string(), "123456");
        assert_eq!(TicketNumber(1).footer(), "Ticket #00001");
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in TicketState::ALL {
            assert_eq!(state.as_str().parse::<TicketState>(), Ok(state));
        }
        assert_eq!("pending redo".parse::<TicketState>(), Ok(TicketState::PendingRedo));
        assert!("approved".parse::<TicketState>().is_err());
    }

    #[test]
    fn test_state_serde_matches_display() {
        let json = serde_json::to_string(&TicketState::PendingRedo).unwrap();
        assert_eq!(json, "\"PENDING_REDO\"");
    }

    #[test]
    fn test_active_states() {
        let active: Vec<_> = TicketState::ALL
            .into_iter()
            .filter(|s| s.is_active())
            .collect();
        assert_eq!(
            active,
            vec![TicketState::Open, TicketState::Pending, TicketState::PendingRedo]
        );
    }

    #[test]
    fn test_malformed_key() {
        let ok = TicketKey::new(GuildId(1), UserId(2), TicketNumber(3));
        assert!(!ok.is_malformed());
        assert!(TicketKey::new(GuildId(0), UserId(2), TicketNumber(3)).is_malformed());
        assert!(TicketKey::new(GuildId(1), UserId(0), TicketNumber(3)).is_malformed());
    }

    proptest! {
        #[test]
        fn prop_padded_display_parses_back(n in 0u64..10_000_000) {
            let footer = TicketNumber(n).footer();
            prop_assert_eq!(crate::embed::parse_ticket_footer(&footer), Some(TicketNumber(n)));
        }
    }
}
