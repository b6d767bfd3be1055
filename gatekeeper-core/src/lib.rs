pub mod answers;
pub mod embed;
pub mod guild;
pub mod ids;
pub mod submission;
pub mod ticket;

pub use answers::{Answer, SellerLinks};
pub use embed::{colours, Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedImage, OutgoingMessage};
pub use guild::{AgeBracket, AgeRoles, DmPreference, DmRoles, GuildConfig, SellerPolicy};
pub use ids::{ChannelId, GuildId, MessageId, RoleId, UserId};
pub use submission::Submission;
pub use ticket::{Ticket, TicketKey, TicketKind, TicketNumber, TicketState, UnknownTicketState};
