//! Model-backed critics and revisers for outlines and chapters.

use async_trait::async_trait;
use storyloom_utils::StoryloomError;

use crate::extract::{RatingPayload, StructuredResponseExtractor};
use crate::prompts;
use crate::purpose::Purpose;
use crate::revision::{Critic, Rating, Reviser};
use crate::session::{BackendTarget, ConversationSession, GenerationOptions, Generator};

/// Minimum critique length, in words.
pub const CRITIQUE_MIN_WORDS: usize = 70;

/// Minimum length of a revised outline, in words.
pub const OUTLINE_MIN_WORDS: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Outline,
    Chapter,
}

impl ContentKind {
    fn critique_purpose(self) -> Purpose {
        match self {
            Self::Outline => Purpose::OutlineCritique,
            Self::Chapter => Purpose::ChapterCritique,
        }
    }

    fn rating_purpose(self) -> Purpose {
        match self {
            Self::Outline => Purpose::OutlineRating,
            Self::Chapter => Purpose::ChapterRating,
        }
    }
}

/// Critic that asks one model for feedback and another for a structured rating.
pub struct LlmCritic {
    generator: Generator,
    kind: ContentKind,
    critic: BackendTarget,
    rater: BackendTarget,
    extractor: StructuredResponseExtractor,
}

impl LlmCritic {
    #[must_use]
    pub fn new(
        generator: Generator,
        kind: ContentKind,
        critic: BackendTarget,
        rater: BackendTarget,
        extractor: StructuredResponseExtractor,
    ) -> Self {
        Self {
            generator,
            kind,
            critic,
            rater,
            extractor,
        }
    }
}

/// Convert a decoded rating; the sentinel is a reject.
#[must_use]
pub fn rating_from_payload(payload: &RatingPayload, ok: bool) -> Rating {
    if !ok {
        return Rating::reject();
    }
    Rating {
        complete: payload.is_complete,
        score: payload.score.map(|s| s.clamp(0.0, 100.0).round() as u8),
    }
}

#[async_trait]
impl Critic for LlmCritic {
    async fn critique(&self, content: &str, context: &str) -> Result<String, StoryloomError> {
        let prompt = match self.kind {
            ContentKind::Outline => prompts::outline_critique(content, context),
            ContentKind::Chapter => prompts::chapter_critique(content, context),
        };
        let options =
            GenerationOptions::new(self.kind.critique_purpose()).min_words(CRITIQUE_MIN_WORDS);
        self.generator.ask(prompt, &self.critic, &options).await
    }

    async fn rate(&self, content: &str) -> Result<Rating, StoryloomError> {
        let prompt = match self.kind {
            ContentKind::Outline => prompts::outline_rating(content),
            ContentKind::Chapter => prompts::chapter_rating(content),
        };
        let purpose = self.kind.rating_purpose();
        let mut session = ConversationSession::with_user(prompt);
        self.generator
            .generate(&mut session, &self.rater, &GenerationOptions::new(purpose))
            .await?;
        let extracted = self
            .extractor
            .extract::<RatingPayload>(&self.generator, &mut session, &self.rater, purpose)
            .await?;
        Ok(rating_from_payload(&extracted.value, extracted.ok))
    }
}

/// Rewrites the outline from scratch on every revision.
pub struct OutlineReviser {
    generator: Generator,
    target: BackendTarget,
}

impl OutlineReviser {
    #[must_use]
    pub fn new(generator: Generator, target: BackendTarget) -> Self {
        Self { generator, target }
    }
}

#[async_trait]
impl Reviser for OutlineReviser {
    async fn revise(&mut self, content: &str, feedback: &str) -> Result<String, StoryloomError> {
        let options = GenerationOptions::new(Purpose::OutlineRevision).min_words(OUTLINE_MIN_WORDS);
        self.generator
            .ask(prompts::outline_revision(content, feedback), &self.target, &options)
            .await
    }
}

/// Revises a chapter inside one growing conversation, so later revisions
/// see the earlier requests and replies.
pub struct ChapterReviser {
    generator: Generator,
    target: BackendTarget,
    session: ConversationSession,
    min_words: usize,
}

impl ChapterReviser {
    #[must_use]
    pub fn new(
        generator: Generator,
        target: BackendTarget,
        session: ConversationSession,
        min_words: usize,
    ) -> Self {
        Self {
            generator,
            target,
            session,
            min_words,
        }
    }

    #[must_use]
    pub fn session(&self) -> &ConversationSession {
        &self.session
    }
}

#[async_trait]
impl Reviser for ChapterReviser {
    async fn revise(&mut self, content: &str, feedback: &str) -> Result<String, StoryloomError> {
        self.session
            .push_user(prompts::chapter_revision(content, feedback));
        let options = GenerationOptions::new(Purpose::ChapterRevision).min_words(self.min_words);
        self.generator
            .complete(&mut self.session, &self.target, &options)
            .await
    }
}
