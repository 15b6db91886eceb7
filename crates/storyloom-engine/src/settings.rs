//! Run settings resolved from configuration.
//!
//! The engine never reads configuration or the environment on its own; the
//! CLI resolves a [`Config`] once and hands the resulting [`RunSettings`] to
//! the orchestrator, which passes it down explicitly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use storyloom_config::{Config, DEFAULT_TIMEOUT_SECS, ModelRole};
use strum::IntoEnumIterator;

use crate::extract::StructuredResponseExtractor;
use crate::revision::RevisionPolicy;
use crate::session::BackendTarget;

/// Model identifier per role, already resolved against defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRoles {
    models: BTreeMap<&'static str, String>,
}

impl ModelRoles {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let models = ModelRole::iter()
            .map(|role| (role.key(), config.model_for(role)))
            .collect();
        Self { models }
    }

    /// Same model for every role.
    #[must_use]
    pub fn uniform(model: &str) -> Self {
        let models = ModelRole::iter()
            .map(|role| (role.key(), model.to_string()))
            .collect();
        Self { models }
    }

    #[must_use]
    pub fn model(&self, role: ModelRole) -> &str {
        self.models.get(role.key()).map(String::as_str).unwrap_or_default()
    }

    #[must_use]
    pub fn target(&self, role: ModelRole) -> BackendTarget {
        BackendTarget::new(self.model(role))
    }

    /// `(role key, model)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.models.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Everything a run needs to know, threaded explicitly through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub seed: u64,
    pub quality_threshold: u8,
    pub max_chapters: u32,
    pub extraction_attempts: u32,
    pub stage_min_words: usize,
    pub outline_revisions: RevisionPolicy,
    pub chapter_revisions: RevisionPolicy,
    pub expand_outline: bool,
    pub scene_pipeline: bool,
    pub edit_pass: bool,
    pub scrub_pass: bool,
    /// Target language for the final manuscript.
    pub translate: Option<String>,
    /// Language the prompt is translated into before outlining.
    pub translate_prompt: Option<String>,
    pub models: ModelRoles,
    pub timeout: Duration,
}

fn language(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl RunSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let generation = &config.generation;
        let revisions = &config.revisions;
        let passes = &config.passes;
        let threshold = generation
            .quality_threshold
            .unwrap_or(defaults.quality_threshold);

        Self {
            seed: generation.seed.unwrap_or(defaults.seed),
            quality_threshold: threshold,
            max_chapters: generation.max_chapters.unwrap_or(defaults.max_chapters),
            extraction_attempts: generation
                .extraction_attempts
                .unwrap_or(defaults.extraction_attempts),
            stage_min_words: generation
                .stage_min_words
                .unwrap_or(defaults.stage_min_words),
            outline_revisions: RevisionPolicy::new(
                revisions.outline_min.unwrap_or(defaults.outline_revisions.min),
                revisions.outline_max.unwrap_or(defaults.outline_revisions.max),
                threshold,
            ),
            chapter_revisions: RevisionPolicy {
                min: revisions.chapter_min.unwrap_or(defaults.chapter_revisions.min),
                max: revisions.chapter_max.unwrap_or(defaults.chapter_revisions.max),
                threshold,
                enabled: revisions.chapter_enabled.unwrap_or(true),
            },
            expand_outline: passes.expand_outline.unwrap_or(defaults.expand_outline),
            scene_pipeline: passes.scene_pipeline.unwrap_or(defaults.scene_pipeline),
            edit_pass: passes.edit.unwrap_or(defaults.edit_pass),
            scrub_pass: passes.scrub.unwrap_or(defaults.scrub_pass),
            translate: language(passes.translate.as_ref()),
            translate_prompt: language(passes.translate_prompt.as_ref()),
            models: ModelRoles::from_config(config),
            timeout: Duration::from_secs(config.llm.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        }
    }

    #[must_use]
    pub fn extractor(&self) -> StructuredResponseExtractor {
        StructuredResponseExtractor::new(self.extraction_attempts)
    }

    /// Flat view recorded in the final artifact.
    #[must_use]
    pub fn summary(&self) -> SettingsSummary {
        SettingsSummary {
            seed: self.seed,
            quality_threshold: self.quality_threshold,
            outline_revisions: (self.outline_revisions.min, self.outline_revisions.max),
            chapter_revisions: (self.chapter_revisions.min, self.chapter_revisions.max),
            chapter_revision_enabled: self.chapter_revisions.enabled,
            expand_outline: self.expand_outline,
            scene_pipeline: self.scene_pipeline,
            edit_pass: self.edit_pass,
            scrub_pass: self.scrub_pass,
            translate: self.translate.clone(),
            translate_prompt: self.translate_prompt.clone(),
            models: self
                .models
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        use storyloom_config::{
            DEFAULT_EXTRACTION_ATTEMPTS, DEFAULT_MAX_CHAPTERS, DEFAULT_MAX_REVISIONS,
            DEFAULT_QUALITY_THRESHOLD, DEFAULT_SEED, DEFAULT_STAGE_MIN_WORDS,
        };
        Self {
            seed: DEFAULT_SEED,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            max_chapters: DEFAULT_MAX_CHAPTERS,
            extraction_attempts: DEFAULT_EXTRACTION_ATTEMPTS,
            stage_min_words: DEFAULT_STAGE_MIN_WORDS,
            outline_revisions: RevisionPolicy::new(
                0,
                DEFAULT_MAX_REVISIONS,
                DEFAULT_QUALITY_THRESHOLD,
            ),
            chapter_revisions: RevisionPolicy::new(
                0,
                DEFAULT_MAX_REVISIONS,
                DEFAULT_QUALITY_THRESHOLD,
            ),
            expand_outline: true,
            scene_pipeline: true,
            edit_pass: false,
            scrub_pass: true,
            translate: None,
            translate_prompt: None,
            models: ModelRoles::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Settings as recorded in story metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSummary {
    pub seed: u64,
    pub quality_threshold: u8,
    pub outline_revisions: (u32, u32),
    pub chapter_revisions: (u32, u32),
    pub chapter_revision_enabled: bool,
    pub expand_outline: bool,
    pub scene_pipeline: bool,
    pub edit_pass: bool,
    pub scrub_pass: bool,
    pub translate: Option<String>,
    pub translate_prompt: Option<String>,
    pub models: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_config_defaults() {
        let settings = RunSettings::from_config(&Config::default());
        assert_eq!(settings, RunSettings {
            models: settings.models.clone(),
            ..RunSettings::default()
        });
        assert_eq!(settings.extractor().max_attempts(), 5);
    }

    #[test]
    fn chapter_revision_toggle_and_languages() {
        let mut config = Config::default();
        config.revisions.chapter_enabled = Some(false);
        config.revisions.chapter_max = Some(2);
        config.passes.translate = Some("  ".into());
        config.passes.translate_prompt = Some("French".into());
        config.generation.quality_threshold = Some(70);

        let settings = RunSettings::from_config(&config);
        assert!(!settings.chapter_revisions.enabled);
        assert_eq!(settings.chapter_revisions.max, 2);
        assert_eq!(settings.chapter_revisions.threshold, 70);
        assert_eq!(settings.outline_revisions.threshold, 70);
        assert_eq!(settings.translate, None);
        assert_eq!(settings.translate_prompt.as_deref(), Some("French"));
    }

    #[test]
    fn model_roles_fall_back_to_default() {
        let mut config = Config::default();
        config.models.default = Some("base-model".into());
        config.models.eval = Some("judge".into());

        let roles = ModelRoles::from_config(&config);
        assert_eq!(roles.model(ModelRole::Eval), "judge");
        assert_eq!(roles.model(ModelRole::ChapterStage2), "base-model");
        assert_eq!(roles.target(ModelRole::Info).model, "base-model");
    }
}
