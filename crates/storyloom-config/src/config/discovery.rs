use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;

use storyloom_utils::ConfigError;

use super::{
    CliArgs, Config, ConfigSource, GenerationConfig, LlmConfig, ModelRole, ModelsConfig,
    OpenRouterConfig, OutputConfig, PassesConfig, RevisionsConfig,
};

pub const PROVIDER_ENV: &str = "STORYLOOM_LLM_PROVIDER";
pub const BUDGET_ENV: &str = "STORYLOOM_LLM_BUDGET";

/// TOML configuration file structure
///
/// Also used as the shape of the CLI layer, so file and flags merge through
/// the same code.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    generation: Option<GenerationConfig>,
    revisions: Option<RevisionsConfig>,
    passes: Option<PassesConfig>,
    models: Option<ModelsConfig>,
    llm: Option<LlmConfig>,
    output: Option<OutputConfig>,
}

/// Overwrite `slot` and record `source` when the layer sets a value.
fn apply<T>(
    slot: &mut Option<T>,
    value: Option<T>,
    key: &str,
    source: ConfigSource,
    attribution: &mut HashMap<String, ConfigSource>,
) {
    if let Some(v) = value {
        *slot = Some(v);
        attribution.insert(key.to_string(), source);
    }
}

impl Config {
    /// Discover and load configuration with precedence CLI > env > file > defaults.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory.
    ///
    /// The path-driven variant used by tests to avoid depending on the
    /// process working directory.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        let mut config = Self::default();
        config.attribute_defaults();

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    }
                    .into());
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir)?,
        };

        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)?;
            config.apply_layer(file_config, ConfigSource::Config);
            config.config_path = Some(path.clone());
        }

        config.apply_env()?;
        config.apply_layer(cli_layer(cli_args), ConfigSource::Cli);

        config.validate()?;
        Ok(config)
    }

    /// Walk upward from `start_dir` looking for `.storyloom/config.toml`.
    ///
    /// Stops at repository root markers (.git, .hg, .svn) or the filesystem root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(".storyloom").join("config.toml");
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            if current_dir.join(".git").exists()
                || current_dir.join(".hg").exists()
                || current_dir.join(".svn").exists()
            {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let parsed: TomlConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::InvalidFile(format!("{}: {e}", path.display())))?;
        Ok(parsed)
    }

    fn attribute_defaults(&mut self) {
        for key in [
            "seed",
            "quality_threshold",
            "max_chapters",
            "extraction_attempts",
            "stage_min_words",
            "outline_min",
            "outline_max",
            "chapter_min",
            "chapter_max",
            "chapter_enabled",
            "expand_outline",
            "scene_pipeline",
            "edit",
            "scrub",
            "llm_provider",
            "llm_timeout_secs",
            "output_dir",
            "checkpoint_dir",
        ] {
            self.source_attribution
                .insert(key.to_string(), ConfigSource::Default);
        }
    }

    fn apply_layer(&mut self, layer: TomlConfig, source: ConfigSource) {
        let attr = &mut self.source_attribution;

        if let Some(g) = layer.generation {
            let target = &mut self.generation;
            apply(&mut target.seed, g.seed, "seed", source, attr);
            apply(&mut target.quality_threshold, g.quality_threshold, "quality_threshold", source, attr);
            apply(&mut target.max_chapters, g.max_chapters, "max_chapters", source, attr);
            apply(&mut target.extraction_attempts, g.extraction_attempts, "extraction_attempts", source, attr);
            apply(&mut target.stage_min_words, g.stage_min_words, "stage_min_words", source, attr);
        }

        if let Some(r) = layer.revisions {
            let target = &mut self.revisions;
            apply(&mut target.outline_min, r.outline_min, "outline_min", source, attr);
            apply(&mut target.outline_max, r.outline_max, "outline_max", source, attr);
            apply(&mut target.chapter_min, r.chapter_min, "chapter_min", source, attr);
            apply(&mut target.chapter_max, r.chapter_max, "chapter_max", source, attr);
            apply(&mut target.chapter_enabled, r.chapter_enabled, "chapter_enabled", source, attr);
        }

        if let Some(p) = layer.passes {
            let target = &mut self.passes;
            apply(&mut target.expand_outline, p.expand_outline, "expand_outline", source, attr);
            apply(&mut target.scene_pipeline, p.scene_pipeline, "scene_pipeline", source, attr);
            apply(&mut target.edit, p.edit, "edit", source, attr);
            apply(&mut target.scrub, p.scrub, "scrub", source, attr);
            apply(&mut target.translate, p.translate, "translate", source, attr);
            apply(&mut target.translate_prompt, p.translate_prompt, "translate_prompt", source, attr);
        }

        if let Some(m) = layer.models {
            apply(&mut self.models.default, m.default.clone(), "models.default", source, attr);
            for role in ModelRole::iter() {
                if let Some(model) = m.get(role) {
                    self.models.set(role, Some(model.clone()));
                    attr.insert(format!("models.{}", role.key()), source);
                }
            }
        }

        if let Some(l) = layer.llm {
            apply(&mut self.llm.provider, l.provider, "llm_provider", source, attr);
            apply(&mut self.llm.timeout_secs, l.timeout_secs, "llm_timeout_secs", source, attr);
            if let Some(or) = l.openrouter {
                let target = self.llm.openrouter.get_or_insert_with(OpenRouterConfig::default);
                apply(&mut target.api_key_env, or.api_key_env, "llm_api_key_env", source, attr);
                apply(&mut target.base_url, or.base_url, "llm_base_url", source, attr);
                apply(&mut target.model, or.model, "llm_model", source, attr);
                apply(&mut target.max_tokens, or.max_tokens, "llm_max_tokens", source, attr);
                apply(&mut target.temperature, or.temperature, "llm_temperature", source, attr);
                apply(&mut target.budget, or.budget, "llm_budget", source, attr);
            }
        }

        if let Some(o) = layer.output {
            apply(&mut self.output.dir, o.dir, "output_dir", source, attr);
            apply(&mut self.output.checkpoint_dir, o.checkpoint_dir, "checkpoint_dir", source, attr);
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(provider) = env::var(PROVIDER_ENV)
            && !provider.is_empty()
        {
            self.llm.provider = Some(provider);
            self.source_attribution
                .insert("llm_provider".to_string(), ConfigSource::Env);
        }

        if let Ok(raw) = env::var(BUDGET_ENV)
            && !raw.is_empty()
        {
            let budget: u32 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "llm_budget".to_string(),
                value: format!("{BUDGET_ENV}={raw} is not a positive integer"),
            })?;
            self.llm
                .openrouter
                .get_or_insert_with(OpenRouterConfig::default)
                .budget = Some(budget);
            self.source_attribution
                .insert("llm_budget".to_string(), ConfigSource::Env);
        }

        Ok(())
    }
}

fn flag(set: bool, value: bool) -> Option<bool> {
    set.then_some(value)
}

fn cli_layer(cli: &CliArgs) -> TomlConfig {
    TomlConfig {
        generation: Some(GenerationConfig {
            seed: cli.seed,
            quality_threshold: cli.quality_threshold,
            max_chapters: None,
            extraction_attempts: None,
            stage_min_words: None,
        }),
        revisions: Some(RevisionsConfig {
            outline_min: cli.outline_min_revisions,
            outline_max: cli.outline_max_revisions,
            chapter_min: cli.chapter_min_revisions,
            chapter_max: cli.chapter_max_revisions,
            chapter_enabled: flag(cli.no_chapter_revision, false),
        }),
        passes: Some(PassesConfig {
            expand_outline: flag(cli.no_expand_outline, false),
            scene_pipeline: flag(cli.no_scene_pipeline, false),
            edit: flag(cli.edit_pass, true),
            scrub: flag(cli.no_scrub, false),
            translate: cli.translate.clone(),
            translate_prompt: cli.translate_prompt.clone(),
        }),
        models: Some(cli.models.clone()),
        llm: Some(LlmConfig {
            provider: cli.llm_provider.clone(),
            timeout_secs: None,
            openrouter: None,
        }),
        output: None,
    }
}
