//! Verification flow: from a start trigger to a submission in the
//! moderation queue.
//!
//! A start arrives as a DM command or a member join. The flow takes the
//! member's reply lease, checks their latest ticket, opens a new one and runs
//! the questionnaire. A finished questionnaire is posted to the guild's queue
//! channel and the ticket moves to PENDING. Every failure ends with a
//! best-effort notice to the member and, while the ticket is still OPEN, the
//! ticket is closed.

use std::sync::Arc;
use std::time::Duration;

use gatekeeper_core::{
    colours, Answer, ChannelId, DmPreference, Embed, GuildConfig, GuildId, MessageId,
    SellerPolicy, Submission, Ticket, TicketKey, TicketKind, TicketState, UserId,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gateway::{
    Gateway, GatewayError, IncomingMessage, Member, MessageHandle, Target, User,
};
use crate::leases::{LeaseGuard, ReplyLeases};
use crate::moderation::QUEUE_REACTIONS;
use crate::questionnaire::reddit::PostLookup;
use crate::questionnaire::verification::{
    base_questions, chosen_guild, confirmation_question, guild_choice_question, photo_question,
    seller_questions, BaseAnswers, SellerAnswers,
};
use crate::questionnaire::{
    EngineError, Interrupted, Question, QuestionEngine, Session, CANCELLED_NOTICE,
    DEFAULT_FAILURE,
};
use crate::state_machine::repository::{QueueEntry, RepositoryError};
use crate::state_machine::{OpenOutcome, StoreError, TicketEvent, TicketStore, TransitionError};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SUBREDDIT: &str = "horny";

/// Commands that begin verification from a DM. A leading `!` is optional.
pub const START_COMMANDS: [&str; 3] = ["start", "verify", "verification"];

pub fn is_start_command(content: &str) -> bool {
    let command = content.trim().trim_start_matches('!').to_lowercase();
    START_COMMANDS.contains(&command.as_str())
}

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub reply_timeout: Duration,
    pub subreddit: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            subreddit: DEFAULT_SUBREDDIT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// Posted to the moderation queue.
    Submitted(TicketKey),
    /// Member roles were granted again; nothing else happened.
    AlreadyVerified,
    /// The member is already in the middle of a questionnaire.
    AlreadyInProgress,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("verification timed out")]
    TimedOut,
    #[error("verification cancelled")]
    Cancelled,
    #[error("member already has an open ticket")]
    ExistingTicket,
    #[error("verification is already awaiting review")]
    AwaitingReview,
    #[error("member is blocked from verifying")]
    Blocked,
    #[error("member is not in the guild")]
    NotAMember,
    #[error("rejected by seller policy {0:?}")]
    Policy(SellerPolicy),
    #[error("{0}")]
    Validator(String),
    #[error("ticket was closed during the questionnaire")]
    TicketClosed,
    #[error("no \"{channel}\" channel set")]
    NoChannelSet { channel: &'static str },
    #[error("\"{channel}\" channel is missing")]
    ChannelMissing { channel: &'static str },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<EngineError> for FlowError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Gateway(e) => FlowError::Gateway(e),
            EngineError::Repository(e) => FlowError::Repository(e),
        }
    }
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transition(e) => FlowError::Transition(e),
            StoreError::Repository(e) => FlowError::Repository(e),
        }
    }
}

impl From<Interrupted> for FlowError {
    fn from(reason: Interrupted) -> Self {
        match reason {
            Interrupted::TimedOut => FlowError::TimedOut,
            Interrupted::Cancelled => FlowError::Cancelled,
            Interrupted::TicketClosed => FlowError::TicketClosed,
        }
    }
}

fn contact_admins(guild: &str, reason: &str) -> Embed {
    Embed::notice(format!("🚫 Please contact the admins/mods for {} as {}", guild, reason))
        .with_color(colours::RED)
}

impl FlowError {
    /// What the member is told. `None` when they have already been told or
    /// there is nothing useful to say.
    pub fn notice(&self, guild: &str) -> Option<Embed> {
        let embed = match self {
            FlowError::TimedOut => Embed::notice("⌛ Verification timed out!"),
            FlowError::Cancelled | FlowError::TicketClosed => return None,
            FlowError::ExistingTicket => Embed::notice("🚫 You already have a ticket open!"),
            FlowError::AwaitingReview => Embed::notice(
                "❌ Your verification has already been submitted to the queue, please wait!",
            )
            .with_color(colours::RED),
            FlowError::Blocked => Embed::notice(
                "❌ You've been blocked from applying to this server. \
                 Please contact the mods/admins for further information.",
            )
            .with_color(colours::RED),
            FlowError::NotAMember => Embed::notice(format!("Please join {} before verifying!", guild)),
            FlowError::Policy(SellerPolicy::SellersOnly) => {
                Embed::notice("🚫 This server only allows sellers of adult(NSFW) content!")
            }
            FlowError::Policy(SellerPolicy::SellersPaused) => {
                Embed::notice("🚫 This server currently doesn't allow sellers of adult(NSFW) content!")
                    .with_description("Please come back another time.")
            }
            FlowError::Policy(_) => {
                Embed::notice("🚫 This server doesn't allow sellers of adult(NSFW) content!")
            }
            FlowError::Validator(message) => Embed::notice(format!("🚫 {}", message)),
            FlowError::NoChannelSet { channel } => contact_admins(
                guild,
                &format!("no \"{}\" channel has been set in the config.", channel),
            ),
            FlowError::ChannelMissing { channel } => contact_admins(
                guild,
                &format!("the \"{}\" channel is missing.", channel),
            ),
            FlowError::Gateway(e) => match e.denied_channel() {
                Some(channel) => contact_admins(
                    guild,
                    &format!("I don't have permission to post in {}.", channel.mention()),
                ),
                None => contact_admins(guild, "I've hit a Discord API error."),
            },
            FlowError::Repository(_) | FlowError::Transition(_) => {
                contact_admins(guild, "I've hit a Discord API error.")
            }
        };
        Some(embed)
    }
}

/// The member's latest ticket decides whether a new one may open.
enum Admission {
    Proceed,
    Supersede(TicketKey),
    AlreadyVerified,
}

fn admission(latest: Option<&Ticket>) -> Result<Admission, FlowError> {
    let Some(ticket) = latest else {
        return Ok(Admission::Proceed);
    };
    match ticket.state {
        TicketState::Open => Err(FlowError::ExistingTicket),
        TicketState::Pending => Err(FlowError::AwaitingReview),
        TicketState::Denied => Err(FlowError::Blocked),
        TicketState::Verified => Ok(Admission::AlreadyVerified),
        TicketState::PendingRedo => Ok(Admission::Supersede(ticket.key)),
        TicketState::Closed => Ok(Admission::Proceed),
    }
}

fn policy_check(policy: SellerPolicy, is_seller: bool) -> Result<(), FlowError> {
    match (policy, is_seller) {
        (SellerPolicy::SellersOnly, false) => Err(FlowError::Policy(policy)),
        (SellerPolicy::NoSellers | SellerPolicy::SellersPaused, true) => {
            Err(FlowError::Policy(policy))
        }
        _ => Ok(()),
    }
}

/// A stand-in for the member's last message when the start had none.
fn context_for(user: &User, guild_id: GuildId) -> IncomingMessage {
    IncomingMessage {
        id: MessageId(0),
        channel_id: ChannelId(0),
        guild_id: Some(guild_id),
        author: user.clone(),
        content: String::new(),
        attachments: Vec::new(),
        embeds: Vec::new(),
    }
}

#[derive(Clone)]
pub struct VerificationFlow {
    gateway: Arc<dyn Gateway>,
    store: TicketStore,
    leases: Arc<ReplyLeases>,
    reddit: Arc<dyn PostLookup>,
    settings: FlowSettings,
}

impl VerificationFlow {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        store: TicketStore,
        leases: Arc<ReplyLeases>,
        reddit: Arc<dyn PostLookup>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            leases,
            reddit,
            settings,
        }
    }

    fn engine(&self) -> QuestionEngine<'_> {
        QuestionEngine::new(
            self.gateway.as_ref(),
            self.store.repository().as_ref(),
            self.settings.reply_timeout,
        )
    }

    async fn guild_name(&self, guild_id: GuildId) -> String {
        match self.gateway.resolve_guild(guild_id).await {
            Ok(Some(guild)) => guild.name,
            Ok(None) => guild_id.to_string(),
            Err(e) => {
                debug!("Could not resolve guild {}: {}", guild_id, e);
                guild_id.to_string()
            }
        }
    }

    /// Tell the member, swallowing delivery failures.
    async fn notify(&self, user: UserId, embed: Embed) {
        if let Err(e) = self.gateway.send_message(Target::User(user), embed.into()).await {
            debug!("Could not notify {}: {}", user, e);
        }
    }

    async fn report(&self, user: UserId, err: &FlowError, guild: &str) {
        if let Some(notice) = err.notice(guild) {
            self.notify(user, notice).await;
        }
    }

    /// Start from a member joining `guild_id`.
    pub async fn start_for_member(
        &self,
        guild_id: GuildId,
        user: &User,
    ) -> Result<StartOutcome, FlowError> {
        let Some(lease) = self.leases.try_acquire(user.id) else {
            return Ok(StartOutcome::AlreadyInProgress);
        };
        let guild = self.guild_name(guild_id).await;
        let context = context_for(user, guild_id);
        let result = self.verify(guild_id, &guild, context, &lease).await;
        if let Err(e) = &result {
            info!("Verification of {} in {} ended: {}", user.id, guild_id, e);
            self.report(user.id, e, &guild).await;
        }
        result
    }

    /// Start from a DM command. The guild is picked among configured guilds
    /// the author is a member of.
    pub async fn start_from_dm(&self, message: IncomingMessage) -> Result<StartOutcome, FlowError> {
        let user = message.author.id;
        let Some(lease) = self.leases.try_acquire(user) else {
            return Ok(StartOutcome::AlreadyInProgress);
        };

        let (guild_id, guild) = match self.choose_guild(&message).await {
            Ok(choice) => choice,
            Err(e) => {
                info!("Verification of {} from DM ended: {}", user, e);
                self.report(user, &e, "the server").await;
                return Err(e);
            }
        };

        let result = self.verify(guild_id, &guild, message, &lease).await;
        if let Err(e) = &result {
            info!("Verification of {} in {} ended: {}", user, guild_id, e);
            self.report(user, e, &guild).await;
        }
        result
    }

    async fn choose_guild(&self, message: &IncomingMessage) -> Result<(GuildId, String), FlowError> {
        let user = message.author.id;
        let mut candidates = Vec::new();
        for config in self.store.repository().list_guilds().await? {
            if self.gateway.resolve_member(config.guild_id, user).await?.is_none() {
                continue;
            }
            if let Some(guild) = self.gateway.resolve_guild(config.guild_id).await? {
                candidates.push(guild);
            }
        }

        match candidates.len() {
            0 => Err(FlowError::NotAMember),
            1 => {
                let guild = candidates.remove(0);
                Ok((guild.id, guild.name))
            }
            _ => {
                let question = [guild_choice_question(&candidates)];
                let mut session = Session::new(user, message.clone());
                let answers = self
                    .engine()
                    .run(&mut session, &question)
                    .await?
                    .into_complete(question.len())?;
                let chosen = answers
                    .first()
                    .and_then(chosen_guild)
                    .and_then(|id| candidates.iter().find(|guild| guild.id == id))
                    .ok_or_else(|| FlowError::Validator(DEFAULT_FAILURE.to_string()))?;
                Ok((chosen.id, chosen.name.clone()))
            }
        }
    }

    async fn verify(
        &self,
        guild_id: GuildId,
        guild: &str,
        context: IncomingMessage,
        _lease: &LeaseGuard,
    ) -> Result<StartOutcome, FlowError> {
        let user = context.author.clone();
        let repo = self.store.repository();
        let config = repo.get_or_create_guild(guild_id).await?;
        let member = self
            .gateway
            .resolve_member(guild_id, user.id)
            .await?
            .ok_or(FlowError::NotAMember)?;

        let latest = repo.latest_ticket(guild_id, user.id).await?;
        match admission(latest.as_ref())? {
            Admission::Proceed => {}
            Admission::Supersede(key) => {
                self.store.apply(&key, TicketEvent::Superseded).await?;
            }
            Admission::AlreadyVerified => {
                self.regrant(&config, &member, guild).await?;
                return Ok(StartOutcome::AlreadyVerified);
            }
        }

        let ticket = match self
            .store
            .open_ticket(guild_id, user.id, TicketKind::Verification)
            .await?
        {
            OpenOutcome::Opened(ticket) => ticket,
            // Only OPEN, PENDING and PENDING_REDO tickets block creation.
            OpenOutcome::Blocked(existing) => {
                return Err(match existing.state {
                    TicketState::Pending => FlowError::AwaitingReview,
                    _ => FlowError::ExistingTicket,
                });
            }
        };

        let key = ticket.key;
        let result = self.run_ticket(&config, guild, &member, context, key).await;
        if result.is_err() {
            self.abandon(&key).await;
        }
        result.map(|()| StartOutcome::Submitted(key))
    }

    /// Close the ticket if it is still OPEN.
    async fn abandon(&self, key: &TicketKey) {
        match self.store.apply(key, TicketEvent::Abandoned).await {
            Ok(_) => {}
            Err(StoreError::Transition(e)) => {
                debug!("Ticket #{} not abandoned: {}", key.number, e);
            }
            Err(e) => warn!("Failed to close ticket #{}: {}", key.number, e),
        }
    }

    /// Take a queue post out of the watch set and delete it.
    async fn withdraw(&self, entry: &QueueEntry) {
        if let Err(e) = self
            .store
            .repository()
            .claim_queue_message(entry.message_id)
            .await
        {
            warn!("Failed to unwatch queue post {}: {}", entry.message_id, e);
        }
        let post = MessageHandle {
            channel_id: entry.channel_id,
            message_id: entry.message_id,
        };
        if let Err(e) = self.gateway.delete_message(&post).await {
            warn!(
                "Failed to remove queue post for ticket #{}: {}",
                entry.ticket.number, e
            );
        }
    }

    async fn regrant(
        &self,
        config: &GuildConfig,
        member: &Member,
        guild: &str,
    ) -> Result<(), FlowError> {
        for role in &config.member_roles {
            if !member.has_role(*role) {
                self.gateway
                    .add_role(config.guild_id, member.user.id, *role)
                    .await?;
            }
        }
        info!("{} is already verified in {}", member.user.id, config.guild_id);
        self.notify(
            member.user.id,
            Embed::notice(format!("✅ You're already verified in {}!", guild))
                .with_color(colours::GREEN),
        )
        .await;
        Ok(())
    }

    async fn ask(
        &self,
        session: &mut Session,
        questions: &[Question],
    ) -> Result<Vec<Answer>, FlowError> {
        Ok(self
            .engine()
            .run(session, questions)
            .await?
            .into_complete(questions.len())?)
    }

    async fn run_ticket(
        &self,
        config: &GuildConfig,
        guild: &str,
        member: &Member,
        context: IncomingMessage,
        key: TicketKey,
    ) -> Result<(), FlowError> {
        let user = member.user.id;
        self.gateway
            .send_message(
                Target::User(user),
                Embed::notice(format!("✏️ Verification started for {}!", guild))
                    .with_color(colours::AQUA)
                    .with_description(format!(
                        "This server is **strictly 18+** If you're underage please leave immediately!\n\n\
                         Your ticket number is {}\n\nType `!cancel` to exit.",
                        key.number
                    ))
                    .into(),
            )
            .await?;

        let mut session = Session::new(user, context).for_ticket(key);

        let base = self.ask(&mut session, &base_questions()).await?;
        let base = BaseAnswers::from_answers(&base)
            .ok_or_else(|| FlowError::Validator(DEFAULT_FAILURE.to_string()))?;

        if let Err(e) = policy_check(config.seller_policy, base.is_seller) {
            if config.seller_policy == SellerPolicy::SellersOnly {
                self.store.apply(&key, TicketEvent::PolicyDenied).await?;
            }
            return Err(e);
        }

        let seller = if base.is_seller {
            let questions = seller_questions(guild, &self.settings.subreddit, self.reddit.clone());
            let answers = self.ask(&mut session, &questions).await?;
            SellerAnswers::from_answers(&answers)
        } else {
            None
        };

        let photo = self.ask(&mut session, &[photo_question(guild)]).await?;
        let photo_url = photo.first().and_then(Answer::as_text).map(str::to_string);

        let submission = Submission {
            display_name: member.display_name().to_string(),
            avatar_url: base.avatar_url.clone().or_else(|| member.user.avatar_url()),
            age: base.age,
            dm_preference: DmPreference::from_answers(base.allows_dms, base.ask_first),
            is_seller: base.is_seller,
            links: seller.as_ref().map(|s| s.links.clone()),
            reddit_post: seller.and_then(|s| s.reddit_post),
            photo_url,
        };

        self.gateway
            .send_message(Target::User(user), submission.preview_embed(key.number).into())
            .await?;

        let confirmed = self.ask(&mut session, &[confirmation_question()]).await?;
        if confirmed.first().and_then(Answer::as_flag) != Some(true) {
            self.notify(user, Embed::notice(CANCELLED_NOTICE)).await;
            return Err(FlowError::Cancelled);
        }

        let queue = self.queue_channel(config).await?;
        self.submit(queue, guild, key, &submission).await
    }

    async fn queue_channel(&self, config: &GuildConfig) -> Result<ChannelId, FlowError> {
        let channel = config
            .queue_channel
            .ok_or(FlowError::NoChannelSet { channel: "queue" })?;
        self.gateway
            .resolve_channel(channel)
            .await?
            .map(|channel| channel.id)
            .ok_or(FlowError::ChannelMissing { channel: "queue" })
    }

    async fn submit(
        &self,
        queue: ChannelId,
        guild: &str,
        key: TicketKey,
        submission: &Submission,
    ) -> Result<(), FlowError> {
        let user = key.user_id;
        let submitting = self
            .gateway
            .send_message(
                Target::User(user),
                Embed::text(format!("Submitting verification to {}!", guild))
                    .with_color(colours::GREEN)
                    .with_footer(key.number.footer())
                    .into(),
            )
            .await?;

        let post = self
            .gateway
            .send_message(
                Target::Channel(queue),
                submission.queue_embed(user, key.number).into(),
            )
            .await?;

        let entry = QueueEntry {
            channel_id: post.channel_id,
            message_id: post.message_id,
            ticket: key,
        };
        let repo = self.store.repository();
        let tracked = match repo.set_submission(&key, submission).await {
            Ok(()) => repo.watch_queue_message(entry).await,
            Err(e) => Err(e),
        };
        if let Err(e) = tracked {
            self.withdraw(&entry).await;
            return Err(FlowError::Repository(e));
        }

        // Watched before PENDING so a queued ticket always has a live post.
        if let Err(e) = self
            .store
            .apply(&key, TicketEvent::QuestionnaireCompleted)
            .await
        {
            self.withdraw(&entry).await;
            return Err(match e {
                StoreError::Transition(_) => FlowError::TicketClosed,
                StoreError::Repository(e) => FlowError::Repository(e),
            });
        }
        info!("Ticket #{} queued in {} as {}", key.number, queue, post.message_id);

        for emoji in QUEUE_REACTIONS {
            if let Err(e) = self.gateway.add_reaction(&post, emoji).await {
                warn!("Failed to add {} to queue post for ticket #{}: {}", emoji, key.number, e);
            }
        }

        let submitted = Embed::notice(format!("🚀 Verification submitted to {}!", guild))
            .with_color(colours::GREEN)
            .with_description(
                "Once your verification has been accepted you'll get a message here from me.",
            )
            .with_footer(key.number.footer());
        if let Err(e) = self.gateway.edit_message(&submitting, submitted.into()).await {
            debug!("Could not update submission DM for ticket #{}: {}", key.number, e);
        }
        Ok(())
    }
}
