//! Whole-manuscript post-passes: edit, scrub, translate.
//!
//! Each pass rewrites chapters one at a time and reports progress after every
//! chapter, so an interrupted pass resumes at the first chapter it had not
//! finished.

use serde::{Deserialize, Serialize};
use storyloom_config::ModelRole;
use storyloom_utils::StoryloomError;
use strum::{Display, EnumIter};
use tracing::{debug, info};

use crate::output::assemble_manuscript;
use crate::prompts::{self, EditContext};
use crate::purpose::Purpose;
use crate::session::{GenerationOptions, Generator};
use crate::settings::RunSettings;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PassKind {
    Edit,
    Scrub,
    Translate,
}

impl PassKind {
    #[must_use]
    pub fn purpose(self) -> Purpose {
        match self {
            Self::Edit => Purpose::EditPass,
            Self::Scrub => Purpose::ScrubPass,
            Self::Translate => Purpose::TranslatePass,
        }
    }

    fn role(self) -> ModelRole {
        match self {
            Self::Edit => ModelRole::ChapterRevision,
            Self::Scrub => ModelRole::Scrub,
            Self::Translate => ModelRole::Translator,
        }
    }

    /// Passes enabled by `settings`, in execution order.
    #[must_use]
    pub fn enabled(settings: &RunSettings) -> Vec<Self> {
        let mut passes = Vec::new();
        if settings.edit_pass {
            passes.push(Self::Edit);
        }
        if settings.scrub_pass {
            passes.push(Self::Scrub);
        }
        if settings.translate.is_some() {
            passes.push(Self::Translate);
        }
        passes
    }
}

/// Callback invoked with the rewritten chapters after each chapter.
pub type ProgressSink<'a> = dyn FnMut(&[String]) -> Result<(), StoryloomError> + Send + 'a;

pub struct PostPass<'a> {
    generator: &'a Generator,
    settings: &'a RunSettings,
}

impl<'a> PostPass<'a> {
    #[must_use]
    pub fn new(generator: &'a Generator, settings: &'a RunSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// Rewrite chapter `index` (0-based) of `chapters`.
    ///
    /// # Errors
    ///
    /// Fatal generation errors.
    pub async fn rewrite(
        &self,
        kind: PassKind,
        index: usize,
        chapters: &[String],
        outline: &str,
    ) -> Result<String, StoryloomError> {
        let chapter = chapters.get(index).map(String::as_str).unwrap_or_default();
        let prompt = match kind {
            PassKind::Edit => {
                let manuscript = assemble_manuscript(chapters);
                prompts::edit_chapter(&EditContext {
                    number: index + 1,
                    total: chapters.len(),
                    chapter,
                    manuscript: &manuscript,
                    outline,
                })
            }
            PassKind::Scrub => prompts::scrub_chapter(chapter),
            PassKind::Translate => match &self.settings.translate {
                Some(language) => prompts::translate_chapter(chapter, language),
                None => return Ok(chapter.to_string()),
            },
        };
        let mut options = GenerationOptions::new(kind.purpose());
        if kind == PassKind::Edit {
            options = options.min_words(self.settings.stage_min_words);
        }
        self.generator
            .ask(prompt, &self.settings.models.target(kind.role()), &options)
            .await
    }

    /// Run `kind` over `source`, continuing after the chapters in `done`.
    ///
    /// Chapters not yet rewritten are taken from `source`, so the edit pass
    /// sees already-edited chapters before the current one.
    ///
    /// # Errors
    ///
    /// Fatal generation errors, or whatever `progress` returns.
    pub async fn run(
        &self,
        kind: PassKind,
        source: &[String],
        outline: &str,
        mut done: Vec<String>,
        progress: &mut ProgressSink<'_>,
    ) -> Result<Vec<String>, StoryloomError> {
        done.truncate(source.len());
        if !done.is_empty() {
            info!(pass = %kind, resumed_at = done.len() + 1, "Resuming pass");
        }
        for index in done.len()..source.len() {
            let mut current = done.clone();
            current.extend_from_slice(&source[index..]);
            let text = self.rewrite(kind, index, &current, outline).await?;
            done.push(text);
            progress(&done)?;
            debug!(pass = %kind, chapter = index + 1, "Chapter rewritten");
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CancelFlag;
    use crate::test_support::ScriptedBackend;

    #[test]
    fn enabled_passes_follow_settings() {
        let mut settings = RunSettings::default();
        assert_eq!(PassKind::enabled(&settings), vec![PassKind::Scrub]);
        settings.edit_pass = true;
        settings.translate = Some("German".into());
        assert_eq!(
            PassKind::enabled(&settings),
            vec![PassKind::Edit, PassKind::Scrub, PassKind::Translate]
        );
        assert_eq!(PassKind::Translate.to_string(), "translate");
    }

    #[tokio::test]
    async fn pass_resumes_after_completed_chapters() {
        let backend = ScriptedBackend::new();
        backend.push(Purpose::ScrubPass, "clean three");
        let generator = backend.generator(CancelFlag::new(), 1);
        let settings = RunSettings::default();
        let source = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let mut saved = Vec::new();

        let result = PostPass::new(&generator, &settings)
            .run(
                PassKind::Scrub,
                &source,
                "outline",
                vec!["clean one".into(), "clean two".into()],
                &mut |chapters: &[String]| {
                    saved.push(chapters.len());
                    Ok(())
                },
            )
            .await
            .unwrap();

        assert_eq!(result, vec!["clean one", "clean two", "clean three"]);
        assert_eq!(saved, vec![3]);
        assert_eq!(backend.calls_for(Purpose::ScrubPass).len(), 1);
    }

    #[tokio::test]
    async fn edit_pass_sees_whole_manuscript() {
        let backend = ScriptedBackend::new();
        let generator = backend.generator(CancelFlag::new(), 1);
        let mut settings = RunSettings::default();
        settings.stage_min_words = 1;
        let source = vec!["alpha text".to_string(), "beta text".to_string()];

        PostPass::new(&generator, &settings)
            .rewrite(PassKind::Edit, 1, &source, "the outline")
            .await
            .unwrap();

        let call = &backend.calls_for(Purpose::EditPass)[0];
        let prompt = &call.messages.last().unwrap().content;
        assert!(prompt.contains("### Chapter 1\n\nalpha text"));
        assert!(prompt.contains("chapter 2 of 2"));
        assert!(prompt.contains("the outline"));
    }
}
