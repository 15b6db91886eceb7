//! Scene-by-scene production of a chapter's first stage.

use async_trait::async_trait;
use storyloom_utils::StoryloomError;
use tracing::{debug, warn};

use crate::extract::{ScenePlan, StructuredResponseExtractor};
use crate::pipeline::{StageInput, StageProducer};
use crate::prompts::{self, ChapterBrief};
use crate::purpose::Purpose;
use crate::session::{BackendTarget, ConversationSession, GenerationOptions, Generator};

/// Breaks the chapter plan into scenes and writes them one at a time.
pub struct ScenePipeline {
    writer: BackendTarget,
    checker: BackendTarget,
    extractor: StructuredResponseExtractor,
    min_words: usize,
}

impl ScenePipeline {
    #[must_use]
    pub fn new(
        writer: BackendTarget,
        checker: BackendTarget,
        extractor: StructuredResponseExtractor,
        min_words: usize,
    ) -> Self {
        Self {
            writer,
            checker,
            extractor,
            min_words,
        }
    }

    /// Scene outlines for the chapter.
    ///
    /// `input` carries the gate's verdict on a rejected attempt into the
    /// breakdown prompt. Falls back to a single scene holding the whole chapter plan when the
    /// list cannot be extracted or comes back empty.
    ///
    /// # Errors
    ///
    /// Fatal generation errors.
    pub async fn plan(
        &self,
        generator: &Generator,
        brief: &ChapterBrief,
        input: &StageInput<'_>,
    ) -> Result<Vec<String>, StoryloomError> {
        let breakdown = generator
            .ask(
                prompts::scene_breakdown(brief, input),
                &self.writer,
                &GenerationOptions::new(Purpose::SceneBreakdown),
            )
            .await?;

        let mut session = ConversationSession::with_user(prompts::scene_list(&breakdown));
        generator
            .generate(
                &mut session,
                &self.checker,
                &GenerationOptions::new(Purpose::SceneList),
            )
            .await?;
        let extracted = self
            .extractor
            .extract::<ScenePlan>(generator, &mut session, &self.checker, Purpose::SceneList)
            .await?;

        let scenes: Vec<String> = extracted
            .value
            .scenes
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if scenes.is_empty() {
            warn!(
                chapter = brief.number,
                "No scene list extracted, writing the chapter as one scene"
            );
            return Ok(vec![brief.plan.clone()]);
        }
        debug!(chapter = brief.number, scenes = scenes.len(), "Scene plan ready");
        Ok(scenes)
    }

    /// Write every scene in order and join them with blank lines.
    ///
    /// # Errors
    ///
    /// Fatal generation errors.
    pub async fn write(
        &self,
        generator: &Generator,
        brief: &ChapterBrief,
        input: &StageInput<'_>,
        seed: u64,
    ) -> Result<String, StoryloomError> {
        let scenes = self.plan(generator, brief, input).await?;
        let count = scenes.len();
        let mut written = Vec::with_capacity(count);
        for (index, scene) in scenes.iter().enumerate() {
            let options = GenerationOptions::new(Purpose::SceneWrite)
                .seed(seed.wrapping_add(index as u64))
                .min_words(self.min_words);
            let text = generator
                .ask(
                    prompts::scene_write(brief, input, scene, index + 1, count),
                    &self.writer,
                    &options,
                )
                .await?;
            written.push(text);
        }
        Ok(written.join("\n\n"))
    }
}

#[async_trait]
impl StageProducer<ChapterBrief> for ScenePipeline {
    async fn produce(
        &self,
        generator: &Generator,
        shared: &ChapterBrief,
        input: &StageInput<'_>,
        seed: u64,
    ) -> Result<String, StoryloomError> {
        self.write(generator, shared, input, seed).await
    }
}
