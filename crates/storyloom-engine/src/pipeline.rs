//! Staged generation pipeline.
//!
//! Stages run strictly in order. Each stage's accepted content is the
//! `previous` input of the next one. A stage is retried with the gate's
//! feedback until it is accepted; once the attempt counter passes the
//! ceiling the last content is force-accepted and the stage is flagged.
//! The last stage's content then goes through a revision loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storyloom_utils::StoryloomError;
use strum::Display;
use tracing::{debug, info, warn};

use crate::purpose::Purpose;
use crate::revision::{Critic, QualityGatedRevisionLoop, Reviser, RevisionOutcome};
use crate::session::{BackendTarget, ConversationSession, GenerationOptions, Generator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Plot,
    CharacterDevelopment,
    Dialogue,
}

impl StageKind {
    #[must_use]
    pub fn purpose(self) -> Purpose {
        match self {
            Self::Plot => Purpose::StagePlot,
            Self::CharacterDevelopment => Purpose::StageCharacter,
            Self::Dialogue => Purpose::StageDialogue,
        }
    }
}

/// What a stage sees on one attempt.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// Accepted content of the preceding stage; empty for the first stage.
    pub previous: &'a str,
    /// Gate feedback on the last rejected attempt.
    pub feedback: Option<&'a str>,
    /// The last rejected attempt.
    pub rejected: Option<&'a str>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl<'a> StageInput<'a> {
    #[must_use]
    pub fn first(previous: &'a str) -> Self {
        Self {
            previous,
            feedback: None,
            rejected: None,
            attempt: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateVerdict {
    pub accepted: bool,
    pub feedback: String,
}

impl GateVerdict {
    #[must_use]
    pub fn accept() -> Self {
        Self {
            accepted: true,
            feedback: String::new(),
        }
    }

    #[must_use]
    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            accepted: false,
            feedback: feedback.into(),
        }
    }
}

/// Decides whether a stage's content may advance.
#[async_trait]
pub trait AcceptabilityCheck: Send + Sync {
    async fn check(&self, content: &str) -> Result<GateVerdict, StoryloomError>;
}

/// Builds the stage prompt from shared context and the attempt input.
pub type PromptBuilder<C> = fn(&C, &StageInput<'_>) -> String;

/// Produces stage content by some other means than a single prompt.
#[async_trait]
pub trait StageProducer<C: Sync>: Send + Sync {
    async fn produce(
        &self,
        generator: &Generator,
        shared: &C,
        input: &StageInput<'_>,
        seed: u64,
    ) -> Result<String, StoryloomError>;
}

pub enum StageSource<C> {
    /// One prompt, one reply.
    Prompted {
        target: BackendTarget,
        min_words: Option<usize>,
        build_prompt: PromptBuilder<C>,
    },
    /// Content comes from a sub-pipeline.
    Delegated(Box<dyn StageProducer<C>>),
}

pub struct StageSpec<C> {
    pub kind: StageKind,
    pub source: StageSource<C>,
    pub check: Arc<dyn AcceptabilityCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub kind: StageKind,
    pub content: String,
    /// False when the content was force-accepted at the ceiling.
    pub accepted: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub stages: Vec<StageResult>,
    pub revision: RevisionOutcome,
}

impl PipelineOutcome {
    /// Final content after revision.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.revision.content
    }

    /// Stages that were force-accepted.
    pub fn forced_stages(&self) -> impl Iterator<Item = &StageResult> {
        self.stages.iter().filter(|s| !s.accepted)
    }
}

pub struct StagedPipeline<C> {
    stages: Vec<StageSpec<C>>,
    attempt_ceiling: u32,
}

impl<C: Sync> StagedPipeline<C> {
    #[must_use]
    pub fn new(stages: Vec<StageSpec<C>>, attempt_ceiling: u32) -> Self {
        Self {
            stages,
            attempt_ceiling,
        }
    }

    #[must_use]
    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind).collect()
    }

    async fn produce(
        &self,
        stage: &StageSpec<C>,
        generator: &Generator,
        base: &ConversationSession,
        shared: &C,
        input: &StageInput<'_>,
        seed: u64,
    ) -> Result<String, StoryloomError> {
        match &stage.source {
            StageSource::Prompted {
                target,
                min_words,
                build_prompt,
            } => {
                let mut session = base.clone();
                session.push_user(build_prompt(shared, input));
                let mut options = GenerationOptions::new(stage.kind.purpose()).seed(seed);
                if let Some(words) = min_words {
                    options = options.min_words(*words);
                }
                generator.complete(&mut session, target, &options).await
            }
            StageSource::Delegated(producer) => {
                producer.produce(generator, shared, input, seed).await
            }
        }
    }

    /// Run every stage in order and return their results.
    ///
    /// # Errors
    ///
    /// Fatal generation errors. Rejections never fail the run.
    pub async fn run_stages(
        &self,
        generator: &Generator,
        base: &ConversationSession,
        shared: &C,
    ) -> Result<Vec<StageResult>, StoryloomError> {
        let mut results: Vec<StageResult> = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let previous = results.last().map(|r| r.content.as_str()).unwrap_or_default();
            let mut feedback: Option<String> = None;
            let mut rejected: Option<String> = None;
            let mut attempt: u32 = 0;

            let result = loop {
                attempt += 1;
                let seed = generator.seed().wrapping_add(u64::from(attempt - 1));
                let input = StageInput {
                    previous,
                    feedback: feedback.as_deref(),
                    rejected: rejected.as_deref(),
                    attempt,
                };
                let content = self
                    .produce(stage, generator, base, shared, &input, seed)
                    .await?;

                if attempt > self.attempt_ceiling {
                    warn!(
                        stage = %stage.kind,
                        attempts = attempt,
                        "Stage attempt ceiling reached, force-accepting last content"
                    );
                    break StageResult {
                        kind: stage.kind,
                        content,
                        accepted: false,
                        attempts: attempt,
                    };
                }

                let verdict = match stage.check.check(&content).await {
                    Ok(verdict) => verdict,
                    Err(e) if !e.is_fatal() => {
                        warn!(stage = %stage.kind, error = %e, "Stage check failed, treating as reject");
                        GateVerdict::reject("")
                    }
                    Err(e) => return Err(e),
                };
                if verdict.accepted {
                    debug!(stage = %stage.kind, attempts = attempt, "Stage accepted");
                    break StageResult {
                        kind: stage.kind,
                        content,
                        accepted: true,
                        attempts: attempt,
                    };
                }
                info!(stage = %stage.kind, attempt, "Stage rejected, retrying with feedback");
                feedback = Some(verdict.feedback);
                rejected = Some(content);
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Run the stages, then polish the last stage's content with `revision`.
    ///
    /// # Errors
    ///
    /// Fatal generation errors from the stages or the revision loop.
    pub async fn run(
        &self,
        generator: &Generator,
        base: &ConversationSession,
        shared: &C,
        revision: &QualityGatedRevisionLoop,
        context: &str,
        critic: &dyn Critic,
        reviser: &mut dyn Reviser,
    ) -> Result<PipelineOutcome, StoryloomError> {
        let stages = self.run_stages(generator, base, shared).await?;
        let content = stages.last().map(|s| s.content.clone()).unwrap_or_default();
        let revision = revision.run(content, context, critic, reviser).await?;
        Ok(PipelineOutcome { stages, revision })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::{Rating, RevisionPolicy, StopReason};
    use crate::session::{CancelFlag, GenerationPort};
    use std::sync::Mutex;
    use storyloom_utils::LlmError;

    /// Replies with `<purpose>#<seed>|<last user message>`.
    struct EchoPort;

    #[async_trait]
    impl GenerationPort for EchoPort {
        async fn generate(
            &self,
            session: &mut ConversationSession,
            _target: &BackendTarget,
            options: &GenerationOptions,
        ) -> Result<(), LlmError> {
            let last = session
                .messages()
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            session.push_assistant(format!(
                "{}#{}|{last}",
                options.purpose,
                options.seed.unwrap_or_default()
            ));
            Ok(())
        }
    }

    struct Verdicts(Mutex<Vec<GateVerdict>>);

    impl Verdicts {
        fn new(mut verdicts: Vec<GateVerdict>) -> Arc<Self> {
            verdicts.reverse();
            Arc::new(Self(Mutex::new(verdicts)))
        }
    }

    #[async_trait]
    impl AcceptabilityCheck for Verdicts {
        async fn check(&self, _content: &str) -> Result<GateVerdict, StoryloomError> {
            Ok(self.0.lock().unwrap().pop().unwrap_or_else(GateVerdict::accept))
        }
    }

    fn prompt(shared: &String, input: &StageInput<'_>) -> String {
        format!(
            "{shared}/prev={}/fb={}",
            input.previous,
            input.feedback.unwrap_or("-")
        )
    }

    fn stage(kind: StageKind, check: Arc<dyn AcceptabilityCheck>) -> StageSpec<String> {
        StageSpec {
            kind,
            source: StageSource::Prompted {
                target: BackendTarget::default(),
                min_words: None,
                build_prompt: prompt,
            },
            check,
        }
    }

    fn generator() -> Generator {
        Generator::new(Arc::new(EchoPort), CancelFlag::new(), 100)
    }

    #[tokio::test]
    async fn stages_chain_previous_content() {
        let pipeline = StagedPipeline::new(
            vec![
                stage(StageKind::Plot, Verdicts::new(vec![])),
                stage(StageKind::Dialogue, Verdicts::new(vec![])),
            ],
            3,
        );
        let results = pipeline
            .run_stages(&generator(), &ConversationSession::new(), &"ctx".to_string())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "stage-plot#100|ctx/prev=/fb=-");
        assert!(results[1].content.contains("prev=stage-plot#100"));
        assert!(results.iter().all(|r| r.accepted && r.attempts == 1));
    }

    #[tokio::test]
    async fn rejection_retries_with_feedback_and_offset_seed() {
        let check = Verdicts::new(vec![GateVerdict::reject("more storm"), GateVerdict::accept()]);
        let pipeline = StagedPipeline::new(vec![stage(StageKind::Plot, check)], 3);
        let results = pipeline
            .run_stages(&generator(), &ConversationSession::new(), &"ctx".to_string())
            .await
            .unwrap();

        assert_eq!(results[0].attempts, 2);
        assert!(results[0].accepted);
        assert_eq!(results[0].content, "stage-plot#101|ctx/prev=/fb=more storm");
    }

    #[tokio::test]
    async fn ceiling_force_accepts_last_content() {
        let check = Verdicts::new(vec![GateVerdict::reject("no"); 10]);
        let pipeline = StagedPipeline::new(vec![stage(StageKind::Plot, check)], 2);
        let results = pipeline
            .run_stages(&generator(), &ConversationSession::new(), &"ctx".to_string())
            .await
            .unwrap();

        assert_eq!(results[0].attempts, 3);
        assert!(!results[0].accepted);
        assert!(results[0].content.starts_with("stage-plot#102|"));
    }

    struct Joined;

    #[async_trait]
    impl StageProducer<String> for Joined {
        async fn produce(
            &self,
            _generator: &Generator,
            shared: &String,
            _input: &StageInput<'_>,
            _seed: u64,
        ) -> Result<String, StoryloomError> {
            Ok(format!("{shared}: scene a\n\n{shared}: scene b"))
        }
    }

    struct AlwaysAccept;

    #[async_trait]
    impl Critic for AlwaysAccept {
        async fn critique(&self, _c: &str, _x: &str) -> Result<String, StoryloomError> {
            Ok(String::new())
        }

        async fn rate(&self, _c: &str) -> Result<Rating, StoryloomError> {
            Ok(Rating {
                complete: true,
                score: Some(100),
            })
        }
    }

    struct NoRevise;

    #[async_trait]
    impl Reviser for NoRevise {
        async fn revise(&mut self, content: &str, _f: &str) -> Result<String, StoryloomError> {
            Ok(content.to_string())
        }
    }

    #[tokio::test]
    async fn delegated_first_stage_feeds_downstream() {
        let pipeline = StagedPipeline::new(
            vec![
                StageSpec {
                    kind: StageKind::Plot,
                    source: StageSource::Delegated(Box::new(Joined)),
                    check: Verdicts::new(vec![]),
                },
                stage(StageKind::Dialogue, Verdicts::new(vec![])),
            ],
            3,
        );
        let outcome = pipeline
            .run(
                &generator(),
                &ConversationSession::new(),
                &"ctx".to_string(),
                &QualityGatedRevisionLoop::new(RevisionPolicy::new(0, 3, 80)),
                "outline",
                &AlwaysAccept,
                &mut NoRevise,
            )
            .await
            .unwrap();

        assert_eq!(outcome.stages[0].content, "ctx: scene a\n\nctx: scene b");
        assert!(outcome.content().contains("prev=ctx: scene a"));
        assert_eq!(outcome.revision.stop, StopReason::Converged);
        assert_eq!(outcome.forced_stages().count(), 0);
    }
}
