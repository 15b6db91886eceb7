//! Run orchestration.
//!
//! [`RunOrchestrator`] drives one run through a fixed sequence of phases:
//!
//! 1. prompt translation (optional)
//! 2. outline generation and revision
//! 3. story info
//! 4. chapter count
//! 5. per-chapter outline expansion (optional)
//! 6. chapters, one at a time
//! 7. edit, scrub and translation passes (each optional)
//! 8. final artifact
//!
//! Every milestone is checkpointed as soon as it exists. On restart the
//! orchestrator loads each milestone before generating it, so a resumed run
//! skips straight to the first missing one. Checkpoints are cleared only after
//! the final artifact has been saved.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storyloom_config::ModelRole;
use storyloom_utils::StoryloomError;
use storyloom_utils::logging::{
    PhaseTimer, log_phase_complete, log_phase_error, log_phase_start, phase_span,
};
use storyloom_utils::stats::word_count;
use strum::{AsRefStr, Display, EnumIter};
use tracing::{Instrument, info, warn};

use crate::chapter::{ChapterRequest, ChapterWriter};
use crate::checkpoint::{
    ChapterCheckpoint, ChapterCountCheckpoint, CheckpointKey, CheckpointStore, Checkpointer,
    PassProgress, RunNamespace, StoryInfoCheckpoint,
};
use crate::extract::{ChapterCountPayload, StoryInfo, StructuredPayload};
use crate::outline::{OutlineArtifacts, OutlineGenerator};
use crate::output::{ArtifactSink, Degradation, SavedStory, StoryMetadata, assemble_manuscript};
use crate::passes::{PassKind, PostPass};
use crate::prompts;
use crate::purpose::Purpose;
use crate::session::{ConversationSession, GenerationOptions, Generator};
use crate::settings::RunSettings;

/// Minimum length of an expanded chapter outline, in words.
pub const CHAPTER_OUTLINE_MIN_WORDS: usize = 50;

static CHAPTER_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bchapter\s+(\d+)").expect("valid chapter heading regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum RunPhase {
    TranslatePrompt,
    Outline,
    StoryInfo,
    ChapterCount,
    ChapterOutlines,
    Chapters,
    EditPass,
    ScrubPass,
    TranslatePass,
    Finalize,
}

impl RunPhase {
    fn for_pass(kind: PassKind) -> Self {
        match kind {
            PassKind::Edit => Self::EditPass,
            PassKind::Scrub => Self::ScrubPass,
            PassKind::Translate => Self::TranslatePass,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Caller-chosen run title; the checkpoint namespace is derived from it.
    pub title: String,
    pub prompt: String,
}

impl RunRequest {
    #[must_use]
    pub fn new(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub namespace: RunNamespace,
    pub metadata: StoryMetadata,
    pub body: String,
    pub chapters: Vec<String>,
    pub chapter_outlines: Vec<String>,
    pub saved: SavedStory,
    /// Milestones found in the store when the run started.
    pub resumed_milestones: usize,
    pub timings: BTreeMap<String, Duration>,
}

impl RunReport {
    #[must_use]
    pub fn timing_summary(&self) -> String {
        self.timings
            .iter()
            .map(|(phase, d)| format!("{phase}: {:.2}s", d.as_secs_f64()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Chapter count from an extracted value, falling back to the highest
/// `Chapter N` heading in `outline`. Returns `(count, used_fallback)`.
#[must_use]
pub fn resolve_chapter_count(extracted: Option<i64>, outline: &str, max: u32) -> (usize, bool) {
    let max = usize::try_from(max.max(1)).unwrap_or(usize::MAX);
    if let Some(n) = extracted
        && n >= 1
    {
        let n = usize::try_from(n).unwrap_or(usize::MAX);
        return (n.min(max), false);
    }
    let headings = CHAPTER_HEADING
        .captures_iter(outline)
        .filter_map(|c| c.get(1)?.as_str().parse::<usize>().ok())
        .max()
        .unwrap_or(1);
    (headings.clamp(1, max), true)
}

/// Outline handed to the chapter writer.
#[must_use]
pub fn mega_outline(outline: &OutlineArtifacts, chapter_outlines: &[String]) -> String {
    if chapter_outlines.is_empty() {
        return outline.complete_outline.clone();
    }
    format!(
        "# Base Outline\n{}\n\n# Detailed Outline\n{}",
        outline.story_elements,
        chapter_outlines.join("\n\n")
    )
}

pub struct RunOrchestrator {
    settings: RunSettings,
    generator: Generator,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ArtifactSink>,
}

impl RunOrchestrator {
    #[must_use]
    pub fn new(
        settings: RunSettings,
        generator: Generator,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            settings,
            generator,
            store,
            sink,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute (or resume) the run for `request`.
    ///
    /// # Errors
    ///
    /// Transport failures, cancellation and checkpoint write failures end the
    /// run and are reported with the phase they happened in. Checkpoints of
    /// completed milestones are kept for the next attempt.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport, StoryloomError> {
        let namespace = RunNamespace::from_title(&request.title)?;
        let checkpoints = Checkpointer::new(Arc::clone(&self.store), namespace.clone());
        let resumed_milestones = checkpoints.milestones()?.len();
        if resumed_milestones > 0 {
            info!(run = %namespace, milestones = resumed_milestones, "Resuming run from checkpoints");
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let mut timer = PhaseTimer::new();
        let mut degraded = Vec::new();
        let ns = &namespace;

        let prompt = self
            .phase(ns, RunPhase::TranslatePrompt, &mut timer, {
                self.translate_prompt(&checkpoints, &request.prompt)
            })
            .await?;

        let outline = self
            .phase(ns, RunPhase::Outline, &mut timer, self.outline(&checkpoints, &prompt))
            .await?;
        if outline.degraded() {
            degraded.push(Degradation::new(
                RunPhase::Outline.as_ref(),
                None,
                format!(
                    "outline revision stopped at ceiling after {} revisions",
                    outline.revisions
                ),
            ));
        }

        let info = self
            .phase(ns, RunPhase::StoryInfo, &mut timer, {
                self.story_info(&checkpoints, &outline, &request.title)
            })
            .await?;
        degraded.extend(info.degraded.clone());
        let info = info.info;

        let count = self
            .phase(ns, RunPhase::ChapterCount, &mut timer, {
                self.chapter_count(&checkpoints, &outline)
            })
            .await?;
        degraded.extend(count.degraded.clone());
        let total = count.count;

        let chapter_outlines = if self.settings.expand_outline {
            self.phase(ns, RunPhase::ChapterOutlines, &mut timer, {
                self.chapter_outlines(&checkpoints, &outline, total)
            })
            .await?
        } else {
            Vec::new()
        };
        let mega = mega_outline(&outline, &chapter_outlines);

        let (mut chapters, chapter_notes) = self
            .phase(ns, RunPhase::Chapters, &mut timer, {
                self.chapters(&checkpoints, &outline, &mega, &chapter_outlines, total)
            })
            .await?;
        degraded.extend(chapter_notes);

        for kind in PassKind::enabled(&self.settings) {
            chapters = self
                .phase(ns, RunPhase::for_pass(kind), &mut timer, {
                    self.post_pass(&checkpoints, kind, &chapters, &mega)
                })
                .await?;
        }

        let body = assemble_manuscript(&chapters);
        let metadata = StoryMetadata {
            title: info.title.clone(),
            summary: info.summary.clone(),
            tags: info.tags.clone(),
            score: info.score,
            base_prompt: request.prompt.clone(),
            outline: mega.clone(),
            story_elements: outline.story_elements.clone(),
            rough_outline: outline.rough_outline.clone(),
            base_context: outline.base_context.clone(),
            chapter_count: chapters.len(),
            word_count: word_count(&body),
            started_at,
            elapsed_secs: started.elapsed().as_secs_f64(),
            seed: self.settings.seed,
            settings: self.settings.summary(),
            degraded,
        };

        let saved = self
            .phase(ns, RunPhase::Finalize, &mut timer, {
                self.finalize(&checkpoints, &body, &metadata)
            })
            .await?;
        timer.finish();

        info!(
            run = %namespace,
            title = %metadata.title,
            chapters = metadata.chapter_count,
            words = metadata.word_count,
            degraded = metadata.degraded.len(),
            "Run complete"
        );

        Ok(RunReport {
            namespace,
            metadata,
            body,
            chapters,
            chapter_outlines,
            saved,
            resumed_milestones,
            timings: timer.timings().clone(),
        })
    }

    async fn phase<T, F>(
        &self,
        namespace: &RunNamespace,
        phase: RunPhase,
        timer: &mut PhaseTimer,
        work: F,
    ) -> Result<T, StoryloomError>
    where
        F: Future<Output = Result<T, StoryloomError>>,
    {
        let run = namespace.as_str();
        let name = phase.as_ref();
        timer.begin(name);
        log_phase_start(run, name);
        let started = Instant::now();

        let result = work.instrument(phase_span(run, name)).await;
        timer.finish();
        let elapsed = started.elapsed().as_millis();

        match result {
            Ok(value) => {
                log_phase_complete(run, name, elapsed);
                Ok(value)
            }
            Err(e) => {
                log_phase_error(run, name, &e.to_string(), elapsed);
                Err(e.in_phase(name))
            }
        }
    }

    async fn translate_prompt(
        &self,
        checkpoints: &Checkpointer,
        prompt: &str,
    ) -> Result<String, StoryloomError> {
        let Some(language) = &self.settings.translate_prompt else {
            return Ok(prompt.to_string());
        };
        if let Some(translated) = checkpoints.load::<String>(CheckpointKey::TranslatedPrompt)? {
            return Ok(translated);
        }
        let translated = self
            .generator
            .ask(
                prompts::translate_prompt(prompt, language),
                &self.settings.models.target(ModelRole::Translator),
                &GenerationOptions::new(Purpose::TranslatePrompt),
            )
            .await?;
        checkpoints.save(CheckpointKey::TranslatedPrompt, &translated)?;
        Ok(translated)
    }

    async fn outline(
        &self,
        checkpoints: &Checkpointer,
        prompt: &str,
    ) -> Result<OutlineArtifacts, StoryloomError> {
        if let Some(outline) = checkpoints.load::<OutlineArtifacts>(CheckpointKey::Outline)? {
            return Ok(outline);
        }
        let outline = OutlineGenerator::new(&self.generator, &self.settings)
            .generate(prompt)
            .await?;
        checkpoints.save(CheckpointKey::Outline, &outline)?;
        Ok(outline)
    }

    async fn story_info(
        &self,
        checkpoints: &Checkpointer,
        outline: &OutlineArtifacts,
        run_title: &str,
    ) -> Result<StoryInfoCheckpoint, StoryloomError> {
        if let Some(info) = checkpoints.load::<StoryInfoCheckpoint>(CheckpointKey::StoryInfo)? {
            return Ok(info);
        }
        let target = self.settings.models.target(ModelRole::Info);
        let mut session = ConversationSession::with_user(prompts::story_info(&outline.outline));
        self.generator
            .generate(&mut session, &target, &GenerationOptions::new(Purpose::StoryInfo))
            .await?;
        let extracted = self
            .settings
            .extractor()
            .extract::<StoryInfo>(&self.generator, &mut session, &target, Purpose::StoryInfo)
            .await?;

        let checkpoint = if extracted.ok && !extracted.value.title.trim().is_empty() {
            StoryInfoCheckpoint {
                info: extracted.value,
                degraded: None,
            }
        } else {
            warn!(run_title, "Story info unavailable, falling back to the run title");
            StoryInfoCheckpoint {
                info: StoryInfo {
                    title: run_title.to_string(),
                    ..StoryInfo::sentinel()
                },
                degraded: Some(Degradation::new(
                    RunPhase::StoryInfo.as_ref(),
                    None,
                    "story info could not be extracted, run title used",
                )),
            }
        };
        checkpoints.save(CheckpointKey::StoryInfo, &checkpoint)?;
        Ok(checkpoint)
    }

    async fn chapter_count(
        &self,
        checkpoints: &Checkpointer,
        outline: &OutlineArtifacts,
    ) -> Result<ChapterCountCheckpoint, StoryloomError> {
        if let Some(count) = checkpoints.load::<ChapterCountCheckpoint>(CheckpointKey::ChapterCount)?
            && count.count >= 1
        {
            return Ok(count);
        }
        let target = self.settings.models.target(ModelRole::Eval);
        let mut session = ConversationSession::with_user(prompts::chapter_count(&outline.outline));
        self.generator
            .generate(
                &mut session,
                &target,
                &GenerationOptions::new(Purpose::ChapterCount),
            )
            .await?;
        let extracted = self
            .settings
            .extractor()
            .extract::<ChapterCountPayload>(
                &self.generator,
                &mut session,
                &target,
                Purpose::ChapterCount,
            )
            .await?;

        let value = extracted.ok.then_some(extracted.value.total_chapters);
        let (count, fallback) =
            resolve_chapter_count(value, &outline.outline, self.settings.max_chapters);
        let degraded = fallback.then(|| {
            warn!(count, "Chapter count not extracted, counted outline headings instead");
            Degradation::new(
                RunPhase::ChapterCount.as_ref(),
                None,
                format!("chapter count taken from outline headings ({count})"),
            )
        });
        info!(count, "Chapter count resolved");

        let checkpoint = ChapterCountCheckpoint { count, degraded };
        checkpoints.save(CheckpointKey::ChapterCount, &checkpoint)?;
        Ok(checkpoint)
    }

    async fn chapter_outlines(
        &self,
        checkpoints: &Checkpointer,
        outline: &OutlineArtifacts,
        total: usize,
    ) -> Result<Vec<String>, StoryloomError> {
        let target = self.settings.models.target(ModelRole::ChapterOutline);
        let options =
            GenerationOptions::new(Purpose::ChapterOutline).min_words(CHAPTER_OUTLINE_MIN_WORDS);
        let mut session = ConversationSession::with_user(outline.complete_outline.clone());
        let mut expanded = Vec::with_capacity(total);

        for number in 1..=total {
            session.push_user(prompts::chapter_outline_request(number, total));
            let key = CheckpointKey::ChapterOutline(number);
            let text = match checkpoints.load::<String>(key)? {
                Some(text) => {
                    session.push_assistant(text.clone());
                    text
                }
                None => {
                    let text = self
                        .generator
                        .complete(&mut session, &target, &options)
                        .await?;
                    checkpoints.save(key, &text)?;
                    info!(chapter = number, words = word_count(&text), "Chapter outline expanded");
                    text
                }
            };
            expanded.push(text);
        }
        Ok(expanded)
    }

    async fn chapters(
        &self,
        checkpoints: &Checkpointer,
        outline: &OutlineArtifacts,
        mega: &str,
        chapter_outlines: &[String],
        total: usize,
    ) -> Result<(Vec<String>, Vec<Degradation>), StoryloomError> {
        let writer = ChapterWriter::new(&self.generator, &self.settings);
        let mut chapters: Vec<String> = Vec::with_capacity(total);
        let mut degraded = Vec::new();

        for number in 1..=total {
            let key = CheckpointKey::Chapter(number);
            let checkpoint = match checkpoints.load::<ChapterCheckpoint>(key)? {
                Some(checkpoint) => checkpoint,
                None => {
                    let request = ChapterRequest {
                        number,
                        total,
                        plan: chapter_outlines.get(number - 1).map(String::as_str),
                        outline: mega,
                        previous_chapter: chapters.last().map(String::as_str),
                        base_context: &outline.base_context,
                    };
                    let draft = writer.write(&request).await?;
                    let checkpoint = ChapterCheckpoint {
                        degraded: draft
                            .degradations()
                            .into_iter()
                            .map(|note| {
                                Degradation::new(RunPhase::Chapters.as_ref(), Some(number), note)
                            })
                            .collect(),
                        text: draft.text,
                    };
                    checkpoints.save(key, &checkpoint)?;
                    checkpoint
                }
            };
            degraded.extend(checkpoint.degraded);
            chapters.push(checkpoint.text);
        }
        Ok((chapters, degraded))
    }

    async fn post_pass(
        &self,
        checkpoints: &Checkpointer,
        kind: PassKind,
        chapters: &[String],
        outline: &str,
    ) -> Result<Vec<String>, StoryloomError> {
        let key = CheckpointKey::Pass(kind);
        let done = checkpoints
            .load::<PassProgress>(key)?
            .unwrap_or_default()
            .chapters;
        PostPass::new(&self.generator, &self.settings)
            .run(kind, chapters, outline, done, &mut |progress: &[String]| {
                checkpoints.save(
                    key,
                    &PassProgress {
                        chapters: progress.to_vec(),
                    },
                )
            })
            .await
    }

    async fn finalize(
        &self,
        checkpoints: &Checkpointer,
        body: &str,
        metadata: &StoryMetadata,
    ) -> Result<SavedStory, StoryloomError> {
        let saved = self.sink.save_final(&metadata.title, body, metadata)?;
        checkpoints.clear()?;
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{MemoryCheckpointStore, RunCheckpoint};
    use crate::session::CancelFlag;
    use crate::test_support::{MemoryArtifactSink, ScriptedBackend};
    use serde_json::json;

    fn orchestrator(
        backend: &ScriptedBackend,
        store: &Arc<MemoryCheckpointStore>,
        sink: &Arc<MemoryArtifactSink>,
        settings: RunSettings,
        cancel: CancelFlag,
    ) -> RunOrchestrator {
        let generator = backend.generator(cancel, settings.seed);
        RunOrchestrator::new(
            settings,
            generator,
            Arc::clone(store) as Arc<dyn CheckpointStore>,
            Arc::clone(sink) as Arc<dyn ArtifactSink>,
        )
    }

    fn request() -> RunRequest {
        RunRequest::new("harbor", "A lighthouse keeper finds a map in a bottle.")
    }

    #[test]
    fn chapter_count_prefers_extracted_value() {
        assert_eq!(resolve_chapter_count(Some(7), "", 100), (7, false));
        assert_eq!(resolve_chapter_count(Some(250), "", 100), (100, false));
    }

    #[test]
    fn chapter_count_falls_back_to_headings() {
        let outline = "Chapter 1: Arrival\n...\nCHAPTER 2 - Storm\n...\nchapter 4 ends";
        assert_eq!(resolve_chapter_count(Some(-1), outline, 100), (4, true));
        assert_eq!(resolve_chapter_count(None, "no headings", 100), (1, true));
        assert_eq!(resolve_chapter_count(Some(0), outline, 3), (3, true));
    }

    #[test]
    fn phase_names_are_kebab_case() {
        assert_eq!(RunPhase::ChapterOutlines.as_ref(), "chapter-outlines");
        assert_eq!(RunPhase::for_pass(PassKind::Scrub).to_string(), "scrub-pass");
    }

    #[tokio::test]
    async fn full_run_saves_story_and_clears_checkpoints() {
        let backend = ScriptedBackend::new();
        let store = Arc::new(MemoryCheckpointStore::new());
        let sink = Arc::new(MemoryArtifactSink::new());

        let report = orchestrator(&backend, &store, &sink, RunSettings::default(), CancelFlag::new())
            .run(&request())
            .await
            .unwrap();

        assert_eq!(report.chapters.len(), 3);
        assert_eq!(report.chapter_outlines.len(), 3);
        assert!(report.body.contains("### Chapter 3"));
        assert_eq!(report.metadata.title, "The Lantern Harbor");
        assert!(report.metadata.degraded.is_empty());
        assert!(report.metadata.outline.starts_with("# Base Outline\n"));
        assert_eq!(backend.calls_for(Purpose::ScrubPass).len(), 3);

        let saved = sink.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1, report.body);

        let ns = RunNamespace::from_title("harbor").unwrap();
        let view = RunCheckpoint::restore(store, ns).unwrap();
        assert!(view.is_empty());
    }

    #[tokio::test]
    async fn interrupted_run_resumes_with_identical_chapters() {
        let uninterrupted = {
            let store = Arc::new(MemoryCheckpointStore::new());
            let sink = Arc::new(MemoryArtifactSink::new());
            orchestrator(&ScriptedBackend::new(), &store, &sink, RunSettings::default(), CancelFlag::new())
                .run(&request())
                .await
                .unwrap()
        };

        let store = Arc::new(MemoryCheckpointStore::new());
        let sink = Arc::new(MemoryArtifactSink::new());
        let flaky = ScriptedBackend::new();
        flaky.fail_after(30);
        let err = orchestrator(&flaky, &store, &sink, RunSettings::default(), CancelFlag::new())
            .run(&request())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(sink.saved().is_empty());

        let ns = RunNamespace::from_title("harbor").unwrap();
        let partial = RunCheckpoint::restore(Arc::clone(&store) as Arc<dyn CheckpointStore>, ns)
            .unwrap();
        assert!(partial.outline);
        assert_eq!(partial.chapter_outlines, vec![1, 2, 3]);
        assert_eq!(partial.chapters, vec![1]);

        let resumed_backend = ScriptedBackend::new();
        let resumed =
            orchestrator(&resumed_backend, &store, &sink, RunSettings::default(), CancelFlag::new())
                .run(&request())
                .await
                .unwrap();

        assert!(resumed.resumed_milestones > 0);
        assert_eq!(resumed.chapter_outlines, uninterrupted.chapter_outlines);
        assert_eq!(resumed.chapters, uninterrupted.chapters);
        assert_eq!(resumed.body, uninterrupted.body);
        assert!(resumed_backend.calls_for(Purpose::InitialOutline).is_empty());
        assert!(resumed_backend.calls_for(Purpose::ChapterOutline).is_empty());
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_regenerated() {
        let backend = ScriptedBackend::new();
        let store = Arc::new(MemoryCheckpointStore::new());
        let sink = Arc::new(MemoryArtifactSink::new());
        let ns = RunNamespace::from_title("harbor").unwrap();
        store
            .save_checkpoint(&ns, "chapter-count", &json!("three, probably"))
            .unwrap();

        let report = orchestrator(&backend, &store, &sink, RunSettings::default(), CancelFlag::new())
            .run(&request())
            .await
            .unwrap();

        assert_eq!(report.metadata.chapter_count, 3);
        assert_eq!(backend.calls_for(Purpose::ChapterCount).len(), 1);
    }

    #[tokio::test]
    async fn undecodable_count_falls_back_and_is_recorded() {
        let backend = ScriptedBackend::new();
        for _ in 0..5 {
            backend.push(Purpose::ChapterCount, "several");
        }
        let store = Arc::new(MemoryCheckpointStore::new());
        let sink = Arc::new(MemoryArtifactSink::new());
        let mut settings = RunSettings::default();
        settings.scrub_pass = false;
        settings.expand_outline = false;

        let report = orchestrator(&backend, &store, &sink, settings, CancelFlag::new())
            .run(&request())
            .await
            .unwrap();

        assert_eq!(report.metadata.chapter_count, 1);
        assert!(
            report
                .metadata
                .degraded
                .iter()
                .any(|d| d.phase == "chapter-count")
        );
        assert_eq!(report.chapter_outlines.len(), 0);
        assert!(report.body.starts_with("### Chapter 1\n\n"));
    }

    #[tokio::test]
    async fn cancelled_run_reports_phase() {
        let backend = ScriptedBackend::new();
        let store = Arc::new(MemoryCheckpointStore::new());
        let sink = Arc::new(MemoryArtifactSink::new());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = orchestrator(&backend, &store, &sink, RunSettings::default(), cancel)
            .run(&request())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(matches!(err, StoryloomError::Cancelled { ref phase } if phase == "outline"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn translated_prompt_feeds_the_outline() {
        let backend = ScriptedBackend::new();
        backend.push(Purpose::TranslatePrompt, "Ein Leuchtturmwärter findet eine Karte.");
        let store = Arc::new(MemoryCheckpointStore::new());
        let sink = Arc::new(MemoryArtifactSink::new());
        let mut settings = RunSettings::default();
        settings.translate_prompt = Some("German".into());
        settings.scrub_pass = false;

        orchestrator(&backend, &store, &sink, settings, CancelFlag::new())
            .run(&request())
            .await
            .unwrap();

        let call = &backend.calls_for(Purpose::BaseContext)[0];
        assert!(call.messages[0].content.contains("Ein Leuchtturmwärter"));
    }
}
