//! Outline phase: base context, story elements, initial outline, revision.

use serde::{Deserialize, Serialize};
use storyloom_config::ModelRole;
use storyloom_utils::StoryloomError;
use tracing::info;

use crate::critique::{ContentKind, LlmCritic, OUTLINE_MIN_WORDS, OutlineReviser};
use crate::prompts;
use crate::purpose::Purpose;
use crate::revision::{QualityGatedRevisionLoop, StopReason};
use crate::session::{GenerationOptions, Generator};
use crate::settings::RunSettings;

/// Minimum length of the story elements, in words.
pub const ELEMENTS_MIN_WORDS: usize = 150;

/// Everything the outline phase produced. Checkpointed as one milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineArtifacts {
    pub base_context: String,
    pub story_elements: String,
    /// Outline before revision.
    pub rough_outline: String,
    /// Outline after revision.
    pub outline: String,
    /// Base context, elements and outline joined.
    pub complete_outline: String,
    pub revisions: u32,
    pub stop: StopReason,
}

impl OutlineArtifacts {
    /// Revision hit its ceiling without converging.
    #[must_use]
    pub fn degraded(&self) -> bool {
        self.stop == StopReason::CeilingReached
    }
}

pub struct OutlineGenerator<'a> {
    generator: &'a Generator,
    settings: &'a RunSettings,
}

impl<'a> OutlineGenerator<'a> {
    #[must_use]
    pub fn new(generator: &'a Generator, settings: &'a RunSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// Produce and revise the outline for `prompt`.
    ///
    /// # Errors
    ///
    /// Fatal generation errors.
    pub async fn generate(&self, prompt: &str) -> Result<OutlineArtifacts, StoryloomError> {
        let models = &self.settings.models;
        let writer = models.target(ModelRole::InitialOutline);

        let base_context = self
            .generator
            .ask(
                prompts::base_context(prompt),
                &writer,
                &GenerationOptions::new(Purpose::BaseContext),
            )
            .await?;
        let story_elements = self
            .generator
            .ask(
                prompts::story_elements(prompt),
                &writer,
                &GenerationOptions::new(Purpose::StoryElements).min_words(ELEMENTS_MIN_WORDS),
            )
            .await?;
        let rough_outline = self
            .generator
            .ask(
                prompts::initial_outline(prompt, &story_elements),
                &writer,
                &GenerationOptions::new(Purpose::InitialOutline).min_words(OUTLINE_MIN_WORDS),
            )
            .await?;
        info!(words = storyloom_utils::stats::word_count(&rough_outline), "Initial outline ready");

        let critic = LlmCritic::new(
            self.generator.clone(),
            ContentKind::Outline,
            models.target(ModelRole::Revision),
            models.target(ModelRole::Eval),
            self.settings.extractor(),
        );
        let mut reviser = OutlineReviser::new(self.generator.clone(), writer);
        let outcome = QualityGatedRevisionLoop::new(self.settings.outline_revisions)
            .run(rough_outline.clone(), prompt, &critic, &mut reviser)
            .await?;

        let complete_outline = [
            base_context.as_str(),
            story_elements.as_str(),
            outcome.content.as_str(),
        ]
        .join("\n\n");

        Ok(OutlineArtifacts {
            base_context,
            story_elements,
            rough_outline,
            outline: outcome.content,
            complete_outline,
            revisions: outcome.revisions,
            stop: outcome.stop,
        })
    }
}
