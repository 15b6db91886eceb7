use std::path::PathBuf;

use super::ModelsConfig;

/// Configuration overrides supplied on the command line.
///
/// Every `Some`/`true` here wins over the environment, the config file and
/// the built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub llm_provider: Option<String>,
    pub seed: Option<u64>,
    pub quality_threshold: Option<u8>,
    pub outline_min_revisions: Option<u32>,
    pub outline_max_revisions: Option<u32>,
    pub chapter_min_revisions: Option<u32>,
    pub chapter_max_revisions: Option<u32>,
    pub no_chapter_revision: bool,
    pub no_scrub: bool,
    pub no_expand_outline: bool,
    pub no_scene_pipeline: bool,
    pub edit_pass: bool,
    pub translate: Option<String>,
    pub translate_prompt: Option<String>,
    pub models: ModelsConfig,
}
