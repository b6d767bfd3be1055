use std::collections::BTreeMap;
use std::time::Duration;

use gatekeeper_core::{Answer, ChannelId, Embed, TicketKey, UserId};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Question, Validation};
use crate::gateway::{Gateway, GatewayError, IncomingMessage, Target};
use crate::state_machine::repository::{Repository, RepositoryError, TicketRepository};

pub const CANCEL_KEYWORD: &str = "!cancel";
pub const DEFAULT_EMOJI: &str = "❓";
pub const DEFAULT_FAILURE: &str = "Invalid response, try again!";

pub const CANCELLED_NOTICE: &str = "❌ Verification cancelled!";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Why a run stopped before its last question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupted {
    TimedOut,
    /// The member sent the cancel keyword. They have already been told.
    Cancelled,
    /// The ticket left OPEN while the run was in progress.
    TicketClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub answers: Vec<Answer>,
    pub interrupted: Option<Interrupted>,
}

impl RunOutcome {
    /// Only a run with one answer per question counts as finished.
    pub fn is_complete(&self, expected: usize) -> bool {
        self.interrupted.is_none() && self.answers.len() == expected
    }

    pub fn into_complete(self, expected: usize) -> Result<Vec<Answer>, Interrupted> {
        match self.interrupted {
            Some(reason) => Err(reason),
            None if self.answers.len() == expected => Ok(self.answers),
            None => Err(Interrupted::TimedOut),
        }
    }
}

/// Conversation state carried across consecutive runs for one member.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserId,
    pub ticket: Option<TicketKey>,
    /// The member's most recent message, handed to skip checks.
    pub context: IncomingMessage,
    channel: Option<ChannelId>,
    offset: u32,
    answers: BTreeMap<u32, Answer>,
}

impl Session {
    pub fn new(user: UserId, context: IncomingMessage) -> Self {
        Self {
            user,
            ticket: None,
            context,
            channel: None,
            offset: 0,
            answers: BTreeMap::new(),
        }
    }

    pub fn for_ticket(mut self, key: TicketKey) -> Self {
        self.ticket = Some(key);
        self
    }

    /// Answers from every run so far, keyed by their overall question index.
    pub fn answers(&self) -> &BTreeMap<u32, Answer> {
        &self.answers
    }

    /// Index the next run's first question will get.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    fn last_answer(&self) -> Option<Answer> {
        self.answers.values().next_back().cloned()
    }
}

fn is_cancel(content: &str) -> bool {
    content.trim().to_lowercase().starts_with(CANCEL_KEYWORD)
}

pub struct QuestionEngine<'a> {
    gateway: &'a dyn Gateway,
    tickets: &'a dyn Repository,
    timeout: Duration,
}

impl<'a> QuestionEngine<'a> {
    pub fn new(gateway: &'a dyn Gateway, tickets: &'a dyn Repository, timeout: Duration) -> Self {
        Self {
            gateway,
            tickets,
            timeout,
        }
    }

    /// Persist the cursor. `false` means the ticket is no longer OPEN.
    async fn persist(&self, session: &Session, step: u32) -> Result<bool, EngineError> {
        match session.ticket {
            Some(key) => Ok(self
                .tickets
                .record_progress(&key, step, &session.answers)
                .await?),
            None => Ok(true),
        }
    }

    async fn notify(&self, session: &Session, embed: Embed) -> Result<(), EngineError> {
        self.gateway
            .send_message(Target::User(session.user), embed.into())
            .await?;
        Ok(())
    }

    /// Ask `questions` in order. Returns early with whatever was collected
    /// when the member times out, cancels or the ticket closes underneath.
    pub async fn run(
        &self,
        session: &mut Session,
        questions: &[Question],
    ) -> Result<RunOutcome, EngineError> {
        let mut collected = Vec::with_capacity(questions.len());
        let mut previous = session.last_answer();

        for (index, question) in questions.iter().enumerate() {
            let step = session.offset + index as u32;
            if !self.persist(session, step).await? {
                info!("Ticket for {} closed during question {}", session.user, step);
                return Ok(RunOutcome {
                    answers: collected,
                    interrupted: Some(Interrupted::TicketClosed),
                });
            }

            if question.can_skip(&session.context, previous.as_ref()) {
                let answer = question.format(&session.context, previous.as_ref());
                debug!("Skipped question {} for {}", step, session.user);
                session.answers.insert(step, answer.clone());
                collected.push(answer.clone());
                previous = Some(answer);
                continue;
            }

            let prompt = format!(
                "{} {}",
                question.emoji.unwrap_or(DEFAULT_EMOJI),
                question.prompt.render(previous.as_ref())
            );

            // Re-ask until a valid reply, a timeout or a cancel.
            let answer = loop {
                let handle = self
                    .gateway
                    .send_message(Target::User(session.user), Embed::text(&prompt).into())
                    .await?;
                session.channel = Some(handle.channel_id);

                let Some(reply) = self
                    .gateway
                    .await_reply(handle.channel_id, session.user, self.timeout)
                    .await
                else {
                    info!("{} timed out on question {}", session.user, step);
                    return Ok(RunOutcome {
                        answers: collected,
                        interrupted: Some(Interrupted::TimedOut),
                    });
                };
                session.context = reply.clone();

                if is_cancel(&reply.content) {
                    info!("{} cancelled on question {}", session.user, step);
                    self.notify(session, Embed::notice(CANCELLED_NOTICE)).await?;
                    return Ok(RunOutcome {
                        answers: collected,
                        interrupted: Some(Interrupted::Cancelled),
                    });
                }

                let failure = match question.validate(&reply, previous.as_ref()).await {
                    Ok(Validation::Valid) => break question.format(&reply, previous.as_ref()),
                    Ok(Validation::Invalid) => question
                        .failure_message
                        .clone()
                        .unwrap_or_else(|| DEFAULT_FAILURE.to_string()),
                    Ok(Validation::Rejected(message)) => message,
                    Err(e) => {
                        warn!("Could not validate reply from {} to question {}: {:#}", session.user, step, e);
                        format!("I couldn't check that answer ({}), try again!", e)
                    }
                };

                debug!("Rejected reply from {} to question {}", session.user, step);
                self.notify(session, Embed::notice(format!("❌ {}", failure)))
                    .await?;
            };

            session.answers.insert(step, answer.clone());
            collected.push(answer.clone());
            previous = Some(answer);
        }

        session.offset += questions.len() as u32;
        if !self.persist(session, session.offset).await? {
            return Ok(RunOutcome {
                answers: collected,
                interrupted: Some(Interrupted::TicketClosed),
            });
        }

        Ok(RunOutcome {
            answers: collected,
            interrupted: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{self, dm_channel, FakeGateway};
    use crate::questionnaire::Validator;
    use crate::state_machine::repository::{InMemoryRepository, TicketRepository};
    use async_trait::async_trait;
    use gatekeeper_core::{
        answers, GuildId, Ticket, TicketKind, TicketNumber, TicketState,
    };

    const TIMEOUT: Duration = Duration::from_secs(120);

    fn age_question() -> Question {
        Question::new(
            "How old are you?",
            |reply, _| answers::parse_age(&reply.content).is_some(),
            |reply, _| Answer::Number(answers::parse_age(&reply.content).unwrap_or_default()),
        )
    }

    fn yes_no(prompt: &str) -> Question {
        Question::new(
            prompt,
            |reply, _| answers::parse_yes_no(&reply.content).is_some(),
            |reply, _| Answer::Flag(answers::parse_yes_no(&reply.content).unwrap_or(false)),
        )
    }

    fn avatar_question() -> Question {
        Question::new(
            "Please set a profile image.",
            |reply, _| reply.author.avatar.is_some(),
            |reply, _| Answer::Text(reply.author.avatar_url().unwrap_or_default()),
        )
        .with_failure("No profile image detected!")
        .skip_when(|context, _| context.author.avatar.is_some())
    }

    async fn open_ticket(repo: &InMemoryRepository, user: UserId) -> TicketKey {
        let key = TicketKey::new(GuildId(10), user, TicketNumber(1));
        repo.create_ticket(&Ticket::open(key, TicketKind::Verification, 0))
            .await
            .unwrap();
        key
    }

    #[tokio::test]
    async fn test_avatar_skipped_and_age_formatted() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", Some("hash"));
        gateway.queue_dm(&member, "I'm 25 years old");

        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start"));
        let questions = [avatar_question(), age_question()];
        let outcome = engine.run(&mut session, &questions).await.unwrap();

        assert!(outcome.is_complete(2));
        assert_eq!(
            outcome.answers,
            vec![
                Answer::Text("https://cdn.discordapp.com/avatars/7/hash.jpg".to_string()),
                Answer::Number(25),
            ]
        );
        // Only the age prompt went out.
        let sent = gateway.sent_texts(Target::User(member.id));
        assert_eq!(sent, vec!["❓ How old are you?".to_string()]);
        assert_eq!(session.channel(), Some(dm_channel(member.id)));
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_answers() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", None);
        gateway.queue_dm(&member, "30");
        gateway.queue_dm(&member, "  !CANCEL please");

        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start"));
        let questions = [
            age_question(),
            yes_no("Do you want people to DM you?"),
            yes_no("Do you sell adult (NSFW) content?"),
            age_question(),
        ];
        let outcome = engine.run(&mut session, &questions).await.unwrap();

        assert_eq!(outcome.answers, vec![Answer::Number(30)]);
        assert_eq!(outcome.interrupted, Some(Interrupted::Cancelled));
        assert!(!outcome.is_complete(4));
        let sent = gateway.sent_texts(Target::User(member.id));
        assert_eq!(sent.last().unwrap(), CANCELLED_NOTICE);
        assert_eq!(session.offset(), 0);
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_not_success() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", None);

        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start"));
        let outcome = engine.run(&mut session, &[age_question()]).await.unwrap();

        assert!(outcome.answers.is_empty());
        assert_eq!(outcome.interrupted, Some(Interrupted::TimedOut));
        assert_eq!(outcome.into_complete(1), Err(Interrupted::TimedOut));
    }

    #[tokio::test]
    async fn test_invalid_reply_reasks_same_question() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", None);
        gateway.queue_dm(&member, "old enough");
        gateway.queue_dm(&member, "42");

        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start"));
        let outcome = engine.run(&mut session, &[age_question()]).await.unwrap();

        assert_eq!(outcome.answers, vec![Answer::Number(42)]);
        let sent = gateway.sent_texts(Target::User(member.id));
        assert_eq!(
            sent,
            vec![
                "❓ How old are you?".to_string(),
                format!("❌ {}", DEFAULT_FAILURE),
                "❓ How old are you?".to_string(),
            ]
        );
        // Each attempt waited on its own deadline.
        assert_eq!(gateway.await_count(), 2);
    }

    struct Picky;

    #[async_trait]
    impl Validator for Picky {
        async fn validate(
            &self,
            reply: &IncomingMessage,
            _previous: Option<&Answer>,
        ) -> anyhow::Result<Validation> {
            match reply.content.as_str() {
                "ok" => Ok(Validation::Valid),
                "wrong sub" => Ok(Validation::Rejected("Please make the post in /r/horny".to_string())),
                _ => Err(anyhow::anyhow!("lookup failed")),
            }
        }
    }

    #[tokio::test]
    async fn test_validator_messages_and_errors_are_surfaced() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", None);
        gateway.queue_dm(&member, "wrong sub");
        gateway.queue_dm(&member, "network down");
        gateway.queue_dm(&member, "ok");

        let question = Question::with_validator("Link please", Picky, |reply, _| {
            Answer::Text(reply.content.clone())
        })
        .with_emoji("🔗");
        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start"));
        let outcome = engine.run(&mut session, &[question]).await.unwrap();

        assert_eq!(outcome.answers, vec![Answer::Text("ok".to_string())]);
        let sent = gateway.sent_texts(Target::User(member.id));
        assert_eq!(sent[0], "🔗 Link please");
        assert_eq!(sent[1], "❌ Please make the post in /r/horny");
        assert!(sent[3].contains("lookup failed"));
    }

    #[tokio::test]
    async fn test_rejected_replies_never_end_the_run() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", None);
        for _ in 0..7 {
            gateway.queue_dm(&member, "nope, not telling");
        }
        gateway.queue_dm(&member, "25");

        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start"));
        let outcome = engine.run(&mut session, &[age_question()]).await.unwrap();

        assert!(outcome.is_complete(1));
        assert_eq!(outcome.answers, vec![Answer::Number(25)]);
        assert_eq!(gateway.await_count(), 8);
        assert_eq!(gateway.pending_replies(), 0);
        let failures = gateway
            .sent_texts(Target::User(member.id))
            .into_iter()
            .filter(|text| text.starts_with('❌'))
            .count();
        assert_eq!(failures, 7);
    }

    #[tokio::test]
    async fn test_follow_up_prompt_and_skip_use_previous_answer() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", None);
        gateway.queue_dm(&member, "no");

        let questions = [
            yes_no("Do you want people to DM you?"),
            yes_no("unused")
                .follow_up(|previous| format!("previous was {:?}", previous))
                .skip_when(|_, previous| previous.and_then(Answer::as_flag) == Some(false)),
        ];
        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start"));
        let outcome = engine.run(&mut session, &questions).await.unwrap();

        // The skipped answer is formatted from the last reply ("no").
        assert_eq!(outcome.answers, vec![Answer::Flag(false), Answer::Flag(false)]);
        assert_eq!(gateway.sent_texts(Target::User(member.id)).len(), 1);
    }

    #[tokio::test]
    async fn test_progress_persisted_across_chained_runs() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", None);
        let key = open_ticket(&repo, member.id).await;
        gateway.queue_dm(&member, "29");
        gateway.queue_dm(&member, "yes");

        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start")).for_ticket(key);
        engine.run(&mut session, &[age_question()]).await.unwrap();
        engine
            .run(&mut session, &[yes_no("Do you sell adult (NSFW) content?")])
            .await
            .unwrap();

        let ticket = repo.get_ticket(&key).await.unwrap().unwrap();
        assert_eq!(ticket.step, 2);
        assert_eq!(ticket.answers.get(&0), Some(&Answer::Number(29)));
        assert_eq!(ticket.answers.get(&1), Some(&Answer::Flag(true)));
        assert_eq!(session.offset(), 2);
    }

    #[tokio::test]
    async fn test_closed_ticket_stops_the_run() {
        let gateway = FakeGateway::new();
        let repo = InMemoryRepository::new();
        let member = fake::user(7, "ada", None);
        let key = open_ticket(&repo, member.id).await;
        repo.compare_and_set_state(&key, TicketState::Open, TicketState::Closed)
            .await
            .unwrap();

        let engine = QuestionEngine::new(&gateway, &repo, TIMEOUT);
        let mut session = Session::new(member.id, fake::dm_from(&member, "!start")).for_ticket(key);
        let outcome = engine.run(&mut session, &[age_question()]).await.unwrap();

        assert_eq!(outcome.interrupted, Some(Interrupted::TicketClosed));
        assert!(gateway.calls().is_empty());
    }
}
