use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use strum::EnumIter;

pub const DEFAULT_SEED: u64 = 12;
pub const DEFAULT_QUALITY_THRESHOLD: u8 = 85;
pub const DEFAULT_MAX_CHAPTERS: u32 = 100;
pub const DEFAULT_EXTRACTION_ATTEMPTS: u32 = 5;
pub const DEFAULT_STAGE_MIN_WORDS: usize = 100;
pub const DEFAULT_MAX_REVISIONS: u32 = 3;
pub const DEFAULT_PROVIDER: &str = "openrouter";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_OUTPUT_DIR: &str = "Stories";
pub const DEFAULT_CHECKPOINT_DIR: &str = ".storyloom/checkpoints";

/// Where a resolved configuration value came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// Command-line flag (highest precedence).
    Cli,
    /// `STORYLOOM_*` environment variable.
    Env,
    /// `.storyloom/config.toml` or `--config`.
    Config,
    /// Built-in default.
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cli => "cli",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        })
    }
}

/// Resolved configuration for a storyloom run.
///
/// Use [`Config::discover()`] for CLI behavior, or start from
/// [`Config::default()`] and set fields directly when embedding.
///
/// ```toml
/// [generation]
/// seed = 12
/// quality_threshold = 85
///
/// [revisions]
/// outline_max = 3
/// chapter_max = 3
///
/// [passes]
/// scrub = true
/// translate = "French"
///
/// [models]
/// default = "google/gemini-2.0-flash-001"
/// eval = "anthropic/claude-3.5-haiku"
///
/// [llm]
/// provider = "openrouter"
///
/// [llm.openrouter]
/// api_key_env = "OPENROUTER_API_KEY"
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub generation: GenerationConfig,
    pub revisions: RevisionsConfig,
    pub passes: PassesConfig,
    pub models: ModelsConfig,
    pub llm: LlmConfig,
    pub output: OutputConfig,
    /// Source attribution for each setting (for status display).
    pub source_attribution: HashMap<String, ConfigSource>,
    /// The configuration file that was loaded, if any.
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            revisions: RevisionsConfig::default(),
            passes: PassesConfig::default(),
            models: ModelsConfig::default(),
            llm: LlmConfig::default(),
            output: OutputConfig::default(),
            source_attribution: HashMap::new(),
            config_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    /// Base seed; stage retries and scenes offset from it.
    pub seed: Option<u64>,
    /// Minimum rating score (0-100) for a revision loop to converge.
    pub quality_threshold: Option<u8>,
    /// Upper clamp for the resolved chapter count.
    pub max_chapters: Option<u32>,
    /// Total structured-extraction attempts (first parse plus repairs).
    pub extraction_attempts: Option<u32>,
    /// Stage drafts shorter than this are rejected without a checker call.
    pub stage_min_words: Option<usize>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: Some(DEFAULT_SEED),
            quality_threshold: Some(DEFAULT_QUALITY_THRESHOLD),
            max_chapters: Some(DEFAULT_MAX_CHAPTERS),
            extraction_attempts: Some(DEFAULT_EXTRACTION_ATTEMPTS),
            stage_min_words: Some(DEFAULT_STAGE_MIN_WORDS),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RevisionsConfig {
    pub outline_min: Option<u32>,
    pub outline_max: Option<u32>,
    pub chapter_min: Option<u32>,
    pub chapter_max: Option<u32>,
    pub chapter_enabled: Option<bool>,
}

impl Default for RevisionsConfig {
    fn default() -> Self {
        Self {
            outline_min: Some(0),
            outline_max: Some(DEFAULT_MAX_REVISIONS),
            chapter_min: Some(0),
            chapter_max: Some(DEFAULT_MAX_REVISIONS),
            chapter_enabled: Some(true),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PassesConfig {
    pub expand_outline: Option<bool>,
    pub scene_pipeline: Option<bool>,
    pub edit: Option<bool>,
    pub scrub: Option<bool>,
    /// Target language for the final translation pass.
    pub translate: Option<String>,
    /// Language to translate the prompt into before outlining.
    pub translate_prompt: Option<String>,
}

impl Default for PassesConfig {
    fn default() -> Self {
        Self {
            expand_outline: Some(true),
            scene_pipeline: Some(true),
            edit: Some(false),
            scrub: Some(true),
            translate: None,
            translate_prompt: None,
        }
    }
}

/// Named model roles. Each maps to one key under `[models]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ModelRole {
    InitialOutline,
    ChapterOutline,
    ChapterStage1,
    ChapterStage2,
    ChapterStage3,
    ChapterRevision,
    Revision,
    Eval,
    Info,
    Scrub,
    Checker,
    Translator,
}

impl ModelRole {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::InitialOutline => "initial_outline",
            Self::ChapterOutline => "chapter_outline",
            Self::ChapterStage1 => "chapter_stage1",
            Self::ChapterStage2 => "chapter_stage2",
            Self::ChapterStage3 => "chapter_stage3",
            Self::ChapterRevision => "chapter_revision",
            Self::Revision => "revision",
            Self::Eval => "eval",
            Self::Info => "info",
            Self::Scrub => "scrub",
            Self::Checker => "checker",
            Self::Translator => "translator",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    pub default: Option<String>,
    pub initial_outline: Option<String>,
    pub chapter_outline: Option<String>,
    pub chapter_stage1: Option<String>,
    pub chapter_stage2: Option<String>,
    pub chapter_stage3: Option<String>,
    pub chapter_revision: Option<String>,
    pub revision: Option<String>,
    pub eval: Option<String>,
    pub info: Option<String>,
    pub scrub: Option<String>,
    pub checker: Option<String>,
    pub translator: Option<String>,
}

impl ModelsConfig {
    #[must_use]
    pub fn get(&self, role: ModelRole) -> Option<&String> {
        self.slot(role).as_ref()
    }

    pub fn set(&mut self, role: ModelRole, model: Option<String>) {
        *self.slot_mut(role) = model;
    }

    fn slot(&self, role: ModelRole) -> &Option<String> {
        match role {
            ModelRole::InitialOutline => &self.initial_outline,
            ModelRole::ChapterOutline => &self.chapter_outline,
            ModelRole::ChapterStage1 => &self.chapter_stage1,
            ModelRole::ChapterStage2 => &self.chapter_stage2,
            ModelRole::ChapterStage3 => &self.chapter_stage3,
            ModelRole::ChapterRevision => &self.chapter_revision,
            ModelRole::Revision => &self.revision,
            ModelRole::Eval => &self.eval,
            ModelRole::Info => &self.info,
            ModelRole::Scrub => &self.scrub,
            ModelRole::Checker => &self.checker,
            ModelRole::Translator => &self.translator,
        }
    }

    fn slot_mut(&mut self, role: ModelRole) -> &mut Option<String> {
        match role {
            ModelRole::InitialOutline => &mut self.initial_outline,
            ModelRole::ChapterOutline => &mut self.chapter_outline,
            ModelRole::ChapterStage1 => &mut self.chapter_stage1,
            ModelRole::ChapterStage2 => &mut self.chapter_stage2,
            ModelRole::ChapterStage3 => &mut self.chapter_stage3,
            ModelRole::ChapterRevision => &mut self.chapter_revision,
            ModelRole::Revision => &mut self.revision,
            ModelRole::Eval => &mut self.eval,
            ModelRole::Info => &mut self.info,
            ModelRole::Scrub => &mut self.scrub,
            ModelRole::Checker => &mut self.checker,
            ModelRole::Translator => &mut self.translator,
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,
    pub openrouter: Option<OpenRouterConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Some(DEFAULT_PROVIDER.to_string()),
            timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            openrouter: None,
        }
    }
}

/// OpenRouter HTTP provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OpenRouterConfig {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Maximum backend calls per process.
    pub budget: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: Option<String>,
    pub checkpoint_dir: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: Some(DEFAULT_OUTPUT_DIR.to_string()),
            checkpoint_dir: Some(DEFAULT_CHECKPOINT_DIR.to_string()),
        }
    }
}
