//! Per-guild configuration and the role mappings used when approving members.

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, GuildId, RoleId};

/// Whether a guild accepts members who sell adult content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerPolicy {
    /// Everyone may verify.
    #[default]
    Open,
    /// Only sellers may verify; anyone else is denied.
    SellersOnly,
    /// Sellers are turned away.
    NoSellers,
    /// Seller applications are temporarily paused.
    SellersPaused,
}

/// Age brackets with their own roles. Ages outside 18..=98 have no bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeBracket {
    #[serde(rename = "18-30")]
    EighteenToThirty,
    #[serde(rename = "31-40")]
    ThirtyOneToForty,
    #[serde(rename = "41-60")]
    FortyOneToSixty,
    #[serde(rename = "61-98")]
    SixtyOneToNinetyEight,
}

impl AgeBracket {
    pub fn for_age(age: u32) -> Option<Self> {
        match age {
            18..=30 => Some(AgeBracket::EighteenToThirty),
            31..=40 => Some(AgeBracket::ThirtyOneToForty),
            41..=60 => Some(AgeBracket::FortyOneToSixty),
            61..=98 => Some(AgeBracket::SixtyOneToNinetyEight),
            _ => None,
        }
    }
}

/// How a member wants to be approached over DMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DmPreference {
    AskFirst,
    Open,
    Closed,
}

impl DmPreference {
    pub fn from_answers(allows_dms: bool, ask_first: bool) -> Self {
        match (allows_dms, ask_first) {
            (false, _) => DmPreference::Closed,
            (true, true) => DmPreference::AskFirst,
            (true, false) => DmPreference::Open,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DmPreference::AskFirst => "Ask before DMing",
            DmPreference::Open => "DMs are open",
            DmPreference::Closed => "DO NOT DM",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [DmPreference::AskFirst, DmPreference::Open, DmPreference::Closed]
            .into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(label.trim()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRoles {
    #[serde(default, rename = "18-30", skip_serializing_if = "Option::is_none")]
    pub eighteen_to_thirty: Option<RoleId>,
    #[serde(default, rename = "31-40", skip_serializing_if = "Option::is_none")]
    pub thirty_one_to_forty: Option<RoleId>,
    #[serde(default, rename = "41-60", skip_serializing_if = "Option::is_none")]
    pub forty_one_to_sixty: Option<RoleId>,
    #[serde(default, rename = "61-98", skip_serializing_if = "Option::is_none")]
    pub sixty_one_to_ninety_eight: Option<RoleId>,
}

impl AgeRoles {
    pub fn role_for(&self, bracket: AgeBracket) -> Option<RoleId> {
        match bracket {
            AgeBracket::EighteenToThirty => self.eighteen_to_thirty,
            AgeBracket::ThirtyOneToForty => self.thirty_one_to_forty,
            AgeBracket::FortyOneToSixty => self.forty_one_to_sixty,
            AgeBracket::SixtyOneToNinetyEight => self.sixty_one_to_ninety_eight,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmRoles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<RoleId>,
}

impl DmRoles {
    pub fn role_for(&self, preference: DmPreference) -> Option<RoleId> {
        match preference {
            DmPreference::AskFirst => self.ask,
            DmPreference::Open => self.open,
            DmPreference::Closed => self.closed,
        }
    }
}

/// Guild configuration document.
///
/// Created lazily with defaults the first time a guild is seen. Every field
/// carries `#[serde(default)]` so documents written by older versions still
/// load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: GuildId,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub admin_role: Option<RoleId>,
    #[serde(default)]
    pub queue_channel: Option<ChannelId>,
    #[serde(default)]
    pub audit_log_channel: Option<ChannelId>,
    #[serde(default)]
    pub announcement_channel: Option<ChannelId>,
    /// Last allocated ticket number. Only ever increases, except by an
    /// explicit admin reset.
    #[serde(default)]
    pub ticket_number: u64,
    #[serde(default)]
    pub seller_policy: SellerPolicy,
    #[serde(default)]
    pub member_roles: Vec<RoleId>,
    #[serde(default)]
    pub seller_roles: Vec<RoleId>,
    /// Extra role for sellers who verified through a reddit post.
    #[serde(default)]
    pub reddit_seller_role: Option<RoleId>,
    /// Role pinged in the announcement channel when someone is approved.
    #[serde(default)]
    pub welcome_role: Option<RoleId>,
    #[serde(default)]
    pub age_roles: AgeRoles,
    #[serde(default)]
    pub dm_roles: DmRoles,
}

fn default_prefix() -> String {
    "!".to_string()
}

impl GuildConfig {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            prefix: default_prefix(),
            admin_role: None,
            queue_channel: None,
            audit_log_channel: None,
            announcement_channel: None,
            ticket_number: 0,
            seller_policy: SellerPolicy::default(),
            member_roles: Vec::new(),
            seller_roles: Vec::new(),
            reddit_seller_role: None,
            welcome_role: None,
            age_roles: AgeRoles::default(),
            dm_roles: DmRoles::default(),
        }
    }

    pub fn is_admin<'a>(&self, roles: impl IntoIterator<Item = &'a RoleId>) -> bool {
        match self.admin_role {
            Some(admin) => roles.into_iter().any(|role| *role == admin),
            None => false,
        }
    }
}
