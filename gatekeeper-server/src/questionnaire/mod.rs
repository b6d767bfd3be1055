//! Linear questionnaires asked over DMs.
//!
//! A `Question` says what to ask, how to judge a reply and how to turn an
//! accepted reply into an `Answer`. The `QuestionEngine` runs a slice of them
//! in order, persisting the step cursor on the ticket as it goes.
//!
//! Prompts, validators, formatters and skip checks see only the answer to the
//! immediately preceding question.

mod engine;
pub mod reddit;
pub mod verification;

pub use engine::{
    EngineError, Interrupted, QuestionEngine, RunOutcome, Session, CANCELLED_NOTICE, CANCEL_KEYWORD,
    DEFAULT_EMOJI, DEFAULT_FAILURE,
};

use async_trait::async_trait;
use gatekeeper_core::Answer;

use crate::gateway::IncomingMessage;

/// Verdict on a single reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// Rejected with the question's own failure message.
    Invalid,
    /// Rejected with a message specific to this reply.
    Rejected(String),
}

/// Judges a reply. An `Err` is a failure to judge (say, a remote lookup
/// failing) and is reported to the member as a failed attempt.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        reply: &IncomingMessage,
        previous: Option<&Answer>,
    ) -> anyhow::Result<Validation>;
}

struct FnValidator<F>(F);

#[async_trait]
impl<F> Validator for FnValidator<F>
where
    F: Fn(&IncomingMessage, Option<&Answer>) -> bool + Send + Sync,
{
    async fn validate(
        &self,
        reply: &IncomingMessage,
        previous: Option<&Answer>,
    ) -> anyhow::Result<Validation> {
        Ok(if (self.0)(reply, previous) {
            Validation::Valid
        } else {
            Validation::Invalid
        })
    }
}

type PromptFn = Box<dyn Fn(Option<&Answer>) -> String + Send + Sync>;
type FormatFn = Box<dyn Fn(&IncomingMessage, Option<&Answer>) -> Answer + Send + Sync>;
type SkipFn = Box<dyn Fn(&IncomingMessage, Option<&Answer>) -> bool + Send + Sync>;

pub enum Prompt {
    Static(String),
    /// Phrased from the previous answer.
    FollowUp(PromptFn),
}

impl Prompt {
    pub fn render(&self, previous: Option<&Answer>) -> String {
        match self {
            Prompt::Static(text) => text.clone(),
            Prompt::FollowUp(render) => render(previous),
        }
    }
}

pub struct Question {
    pub prompt: Prompt,
    pub emoji: Option<&'static str>,
    pub failure_message: Option<String>,
    validator: Box<dyn Validator>,
    format: FormatFn,
    can_skip: Option<SkipFn>,
}

impl Question {
    pub fn new<V, F>(prompt: impl Into<String>, validate: V, format: F) -> Self
    where
        V: Fn(&IncomingMessage, Option<&Answer>) -> bool + Send + Sync + 'static,
        F: Fn(&IncomingMessage, Option<&Answer>) -> Answer + Send + Sync + 'static,
    {
        Self::with_validator(prompt, FnValidator(validate), format)
    }

    pub fn with_validator<F>(
        prompt: impl Into<String>,
        validator: impl Validator + 'static,
        format: F,
    ) -> Self
    where
        F: Fn(&IncomingMessage, Option<&Answer>) -> Answer + Send + Sync + 'static,
    {
        Self {
            prompt: Prompt::Static(prompt.into()),
            emoji: None,
            failure_message: None,
            validator: Box::new(validator),
            format: Box::new(format),
            can_skip: None,
        }
    }

    pub fn follow_up<P>(mut self, render: P) -> Self
    where
        P: Fn(Option<&Answer>) -> String + Send + Sync + 'static,
    {
        self.prompt = Prompt::FollowUp(Box::new(render));
        self
    }

    pub fn with_emoji(mut self, emoji: &'static str) -> Self {
        self.emoji = Some(emoji);
        self
    }

    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }

    /// Answer without asking when `check` holds. The answer is then
    /// `format(context, previous)`.
    pub fn skip_when<S>(mut self, check: S) -> Self
    where
        S: Fn(&IncomingMessage, Option<&Answer>) -> bool + Send + Sync + 'static,
    {
        self.can_skip = Some(Box::new(check));
        self
    }

    pub fn can_skip(&self, context: &IncomingMessage, previous: Option<&Answer>) -> bool {
        self.can_skip
            .as_ref()
            .map(|check| check(context, previous))
            .unwrap_or(false)
    }

    pub fn format(&self, reply: &IncomingMessage, previous: Option<&Answer>) -> Answer {
        (self.format)(reply, previous)
    }

    pub async fn validate(
        &self,
        reply: &IncomingMessage,
        previous: Option<&Answer>,
    ) -> anyhow::Result<Validation> {
        self.validator.validate(reply, previous).await
    }
}
