//! Chapter writing: plan, three gated stages, then revision.

use async_trait::async_trait;
use std::sync::Arc;
use storyloom_config::ModelRole;
use storyloom_utils::StoryloomError;
use storyloom_utils::stats::word_count;
use tracing::{info, warn};

use crate::critique::{ChapterReviser, ContentKind, LlmCritic};
use crate::extract::{AdherencePayload, StructuredResponseExtractor};
use crate::pipeline::{
    AcceptabilityCheck, GateVerdict, StageKind, StageResult, StageSource, StageSpec,
    StagedPipeline,
};
use crate::prompts::{self, ChapterBrief};
use crate::purpose::Purpose;
use crate::revision::{QualityGatedRevisionLoop, RevisionOutcome};
use crate::scenes::ScenePipeline;
use crate::session::{BackendTarget, ConversationSession, GenerationOptions, Generator};
use crate::settings::RunSettings;

/// Minimum length of an extracted chapter plan, in words.
pub const PLAN_MIN_WORDS: usize = 120;

/// Minimum length of a previous-chapter summary, in words.
pub const SUMMARY_MIN_WORDS: usize = 100;

/// Gate that checks a stage draft against the chapter outline.
///
/// Drafts below the minimum length are rejected without a model call.
/// Otherwise the draft and the outline are summarized separately and the
/// two summaries compared.
pub struct OutlineAdherenceCheck {
    generator: Generator,
    plan: String,
    checker: BackendTarget,
    extractor: StructuredResponseExtractor,
    min_words: usize,
}

impl OutlineAdherenceCheck {
    #[must_use]
    pub fn new(
        generator: Generator,
        plan: impl Into<String>,
        checker: BackendTarget,
        extractor: StructuredResponseExtractor,
        min_words: usize,
    ) -> Self {
        Self {
            generator,
            plan: plan.into(),
            checker,
            extractor,
            min_words,
        }
    }
}

#[async_trait]
impl AcceptabilityCheck for OutlineAdherenceCheck {
    async fn check(&self, content: &str) -> Result<GateVerdict, StoryloomError> {
        let words = word_count(content);
        if words < self.min_words {
            return Ok(GateVerdict::reject(prompts::too_short_feedback(
                words,
                self.min_words,
            )));
        }

        let work_summary = self
            .generator
            .ask(
                prompts::summarize_work(content),
                &self.checker,
                &GenerationOptions::new(Purpose::CheckWorkSummary),
            )
            .await?;
        let outline_summary = self
            .generator
            .ask(
                prompts::summarize_outline(&self.plan),
                &self.checker,
                &GenerationOptions::new(Purpose::CheckOutlineSummary),
            )
            .await?;

        let mut session =
            ConversationSession::with_user(prompts::compare_summaries(&work_summary, &outline_summary));
        self.generator
            .generate(
                &mut session,
                &self.checker,
                &GenerationOptions::new(Purpose::CheckCompare),
            )
            .await?;
        let extracted = self
            .extractor
            .extract::<AdherencePayload>(
                &self.generator,
                &mut session,
                &self.checker,
                Purpose::CheckCompare,
            )
            .await?;

        if !extracted.ok {
            return Ok(GateVerdict::reject(""));
        }
        let feedback = format!("### Extra Suggestions:\n{}", extracted.value.suggestions);
        Ok(GateVerdict {
            accepted: extracted.value.did_follow_outline,
            feedback,
        })
    }
}

/// Inputs for one chapter.
#[derive(Debug, Clone, Copy)]
pub struct ChapterRequest<'a> {
    pub number: usize,
    pub total: usize,
    /// Expanded chapter outline, when outline expansion ran.
    pub plan: Option<&'a str>,
    pub outline: &'a str,
    pub previous_chapter: Option<&'a str>,
    pub base_context: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDraft {
    pub text: String,
    pub stages: Vec<StageResult>,
    pub revision: RevisionOutcome,
}

impl ChapterDraft {
    /// Human-readable notes for every degraded step.
    #[must_use]
    pub fn degradations(&self) -> Vec<String> {
        let mut notes: Vec<String> = self
            .stages
            .iter()
            .filter(|s| !s.accepted)
            .map(|s| {
                format!(
                    "stage {} force-accepted after {} attempts",
                    s.kind, s.attempts
                )
            })
            .collect();
        if self.revision.degraded() {
            notes.push(format!(
                "revision stopped at ceiling after {} revisions",
                self.revision.revisions
            ));
        }
        notes
    }
}

/// Writes one chapter at a time.
pub struct ChapterWriter<'a> {
    generator: &'a Generator,
    settings: &'a RunSettings,
}

impl<'a> ChapterWriter<'a> {
    #[must_use]
    pub fn new(generator: &'a Generator, settings: &'a RunSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    fn target(&self, role: ModelRole) -> BackendTarget {
        self.settings.models.target(role)
    }

    async fn brief(&self, request: &ChapterRequest<'_>) -> Result<ChapterBrief, StoryloomError> {
        let plan = match request.plan {
            Some(plan) => plan.to_string(),
            None => {
                self.generator
                    .ask(
                        prompts::chapter_plan(request.outline, request.number),
                        &self.target(ModelRole::ChapterStage1),
                        &GenerationOptions::new(Purpose::ChapterPlan).min_words(PLAN_MIN_WORDS),
                    )
                    .await?
            }
        };
        let previous_summary = match request.previous_chapter {
            Some(text) if request.number > 1 => {
                self.generator
                    .ask(
                        prompts::chapter_summary(text, request.number),
                        &self.target(ModelRole::ChapterStage1),
                        &GenerationOptions::new(Purpose::ChapterSummary)
                            .min_words(SUMMARY_MIN_WORDS),
                    )
                    .await?
            }
            _ => String::new(),
        };
        Ok(ChapterBrief {
            number: request.number,
            total: request.total,
            plan,
            outline: request.outline.to_string(),
            previous_summary,
            base_context: request.base_context.to_string(),
        })
    }

    fn pipeline(&self, brief: &ChapterBrief) -> StagedPipeline<ChapterBrief> {
        let settings = self.settings;
        let min_words = settings.stage_min_words;
        let check: Arc<dyn AcceptabilityCheck> = Arc::new(OutlineAdherenceCheck::new(
            self.generator.clone(),
            brief.plan.clone(),
            self.target(ModelRole::Checker),
            settings.extractor(),
            min_words,
        ));

        let first = if settings.scene_pipeline {
            StageSource::Delegated(Box::new(ScenePipeline::new(
                self.target(ModelRole::ChapterStage1),
                self.target(ModelRole::Checker),
                settings.extractor(),
                min_words,
            )))
        } else {
            StageSource::Prompted {
                target: self.target(ModelRole::ChapterStage1),
                min_words: Some(min_words),
                build_prompt: prompts::stage_plot,
            }
        };

        let stages = vec![
            StageSpec {
                kind: StageKind::Plot,
                source: first,
                check: Arc::clone(&check),
            },
            StageSpec {
                kind: StageKind::CharacterDevelopment,
                source: StageSource::Prompted {
                    target: self.target(ModelRole::ChapterStage2),
                    min_words: Some(min_words),
                    build_prompt: prompts::stage_character,
                },
                check: Arc::clone(&check),
            },
            StageSpec {
                kind: StageKind::Dialogue,
                source: StageSource::Prompted {
                    target: self.target(ModelRole::ChapterStage3),
                    min_words: Some(min_words),
                    build_prompt: prompts::stage_dialogue,
                },
                check,
            },
        ];
        StagedPipeline::new(stages, settings.chapter_revisions.max)
    }

    /// Write chapter `request.number`.
    ///
    /// # Errors
    ///
    /// Fatal generation errors.
    pub async fn write(&self, request: &ChapterRequest<'_>) -> Result<ChapterDraft, StoryloomError> {
        let brief = self.brief(request).await?;
        let base = ConversationSession::with_system(prompts::chapter_system(
            request.number,
            request.total,
        ));

        let critic = LlmCritic::new(
            self.generator.clone(),
            ContentKind::Chapter,
            self.target(ModelRole::Revision),
            self.target(ModelRole::Eval),
            self.settings.extractor(),
        );
        let mut reviser = ChapterReviser::new(
            self.generator.clone(),
            self.target(ModelRole::ChapterRevision),
            base.clone(),
            self.settings.stage_min_words,
        );

        let outcome = self
            .pipeline(&brief)
            .run(
                self.generator,
                &base,
                &brief,
                &QualityGatedRevisionLoop::new(self.settings.chapter_revisions),
                &brief.outline,
                &critic,
                &mut reviser,
            )
            .await?;

        let draft = ChapterDraft {
            text: outcome.content().to_string(),
            stages: outcome.stages,
            revision: outcome.revision,
        };
        for note in draft.degradations() {
            warn!(chapter = request.number, "{note}");
        }
        info!(
            chapter = request.number,
            words = word_count(&draft.text),
            revisions = draft.revision.revisions,
            "Chapter written"
        );
        Ok(draft)
    }
}
