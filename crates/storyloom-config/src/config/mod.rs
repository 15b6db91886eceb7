//! Configuration management for storyloom
//!
//! TOML configuration with `[generation]`, `[revisions]`, `[passes]`,
//! `[models]`, `[llm]` and `[output]` sections. Every resolved value records
//! the layer it came from in [`Config::source_attribution`].

mod cli_args;
mod discovery;
mod model;
mod sources;
mod validation;

pub use cli_args::CliArgs;
pub use model::*;
pub use validation::KNOWN_PROVIDERS;

impl Config {
    /// Model identifier for `role`.
    ///
    /// Precedence: the role's own entry, then `[models] default`, then the
    /// provider's configured model. An empty string lets the provider pick.
    #[must_use]
    pub fn model_for(&self, role: ModelRole) -> String {
        self.models
            .get(role)
            .or(self.models.default.as_ref())
            .cloned()
            .or_else(|| self.llm.openrouter.as_ref().and_then(|o| o.model.clone()))
            .unwrap_or_default()
    }

    /// Provider name after precedence resolution.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.llm.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::path::{Path, PathBuf};
    use storyloom_utils::ConfigError;
    use tempfile::TempDir;

    fn create_test_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_dir = dir.join(".storyloom");
        fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join("config.toml");
        fs::write(&config_path, content).unwrap();
        config_path
    }

    /// A directory with a `.git` marker so discovery never escapes the tempdir.
    fn isolated_root() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        temp_dir
    }

    fn config_error(err: &anyhow::Error) -> &ConfigError {
        err.downcast_ref::<ConfigError>()
            .unwrap_or_else(|| panic!("expected ConfigError, got {err:#}"))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.generation.seed, Some(12));
        assert_eq!(config.generation.quality_threshold, Some(85));
        assert_eq!(config.generation.max_chapters, Some(100));
        assert_eq!(config.generation.extraction_attempts, Some(5));
        assert_eq!(config.revisions.outline_max, Some(3));
        assert_eq!(config.revisions.chapter_enabled, Some(true));
        assert_eq!(config.passes.scrub, Some(true));
        assert_eq!(config.passes.edit, Some(false));
        assert_eq!(config.provider(), "openrouter");
        assert_eq!(config.output.dir.as_deref(), Some("Stories"));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_discovery_without_file_uses_defaults() {
        let root = isolated_root();
        let config = Config::discover_from(root.path(), &CliArgs::default()).unwrap();

        assert!(config.config_path.is_none());
        assert_eq!(config.generation.seed, Some(12));
        assert_eq!(
            config.source_attribution.get("seed"),
            Some(&ConfigSource::Default)
        );
    }

    #[test]
    #[serial]
    fn test_file_values_override_defaults_and_cli_overrides_file() {
        let root = isolated_root();
        create_test_config_file(
            root.path(),
            r#"
[generation]
seed = 99
quality_threshold = 70

[revisions]
outline_max = 5

[models]
default = "file/default"
eval = "file/eval"
"#,
        );

        let cli = CliArgs {
            quality_threshold: Some(90),
            models: ModelsConfig {
                eval: Some("cli/eval".to_string()),
                ..ModelsConfig::default()
            },
            ..CliArgs::default()
        };
        let config = Config::discover_from(root.path(), &cli).unwrap();

        assert_eq!(config.generation.seed, Some(99));
        assert_eq!(config.generation.quality_threshold, Some(90));
        assert_eq!(config.revisions.outline_max, Some(5));
        assert_eq!(config.model_for(ModelRole::Eval), "cli/eval");
        assert_eq!(config.model_for(ModelRole::Checker), "file/default");

        assert_eq!(config.source_attribution["seed"], ConfigSource::Config);
        assert_eq!(config.source_attribution["quality_threshold"], ConfigSource::Cli);
        assert_eq!(config.source_attribution["models.eval"], ConfigSource::Cli);
    }

    #[test]
    #[serial]
    fn test_discovery_walks_upward_and_stops_at_repo_root() {
        let root = isolated_root();
        create_test_config_file(root.path(), "[generation]\nseed = 7\n");
        let nested = root.path().join("drafts").join("winter");
        fs::create_dir_all(&nested).unwrap();

        let found = Config::discover_config_file_from(&nested).unwrap();
        assert_eq!(found, Some(root.path().join(".storyloom").join("config.toml")));

        let config = Config::discover_from(&nested, &CliArgs::default()).unwrap();
        assert_eq!(config.generation.seed, Some(7));
    }

    #[test]
    #[serial]
    fn test_explicit_missing_config_path_is_an_error() {
        let root = isolated_root();
        let cli = CliArgs {
            config_path: Some(root.path().join("nope.toml")),
            ..CliArgs::default()
        };

        let err = Config::discover_from(root.path(), &cli).unwrap_err();
        assert!(matches!(config_error(&err), ConfigError::NotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_invalid_toml_is_rejected() {
        let root = isolated_root();
        create_test_config_file(root.path(), "[generation\nseed = ");

        let err = Config::discover_from(root.path(), &CliArgs::default()).unwrap_err();
        assert!(matches!(config_error(&err), ConfigError::InvalidFile(_)));
    }

    #[test]
    #[serial]
    fn test_unknown_keys_are_rejected() {
        let root = isolated_root();
        create_test_config_file(root.path(), "[generation]\nseeed = 3\n");

        let err = Config::discover_from(root.path(), &CliArgs::default()).unwrap_err();
        assert!(matches!(config_error(&err), ConfigError::InvalidFile(_)));
    }

    #[test]
    #[serial]
    fn test_wrong_types_are_rejected() {
        let root = isolated_root();
        create_test_config_file(root.path(), "[generation]\nseed = \"twelve\"\n");

        assert!(Config::discover_from(root.path(), &CliArgs::default()).is_err());
    }

    #[test]
    #[serial]
    fn test_env_provider_sits_between_file_and_cli() {
        let root = isolated_root();
        create_test_config_file(root.path(), "[llm]\nprovider = \"bogus\"\n");

        // SAFETY: serialized by #[serial]; no other thread reads the environment.
        unsafe { std::env::set_var("STORYLOOM_LLM_PROVIDER", "openrouter") };
        let from_env = Config::discover_from(root.path(), &CliArgs::default());
        unsafe { std::env::remove_var("STORYLOOM_LLM_PROVIDER") };

        let config = from_env.unwrap();
        assert_eq!(config.provider(), "openrouter");
        assert_eq!(config.source_attribution["llm_provider"], ConfigSource::Env);

        let cli = CliArgs {
            llm_provider: Some("openrouter".to_string()),
            ..CliArgs::default()
        };
        let err = Config::discover_from(root.path(), &CliArgs::default()).unwrap_err();
        assert!(matches!(
            config_error(&err),
            ConfigError::InvalidValue { key, .. } if key == "llm_provider"
        ));
        let config = Config::discover_from(root.path(), &cli).unwrap();
        assert_eq!(config.source_attribution["llm_provider"], ConfigSource::Cli);
    }

    #[test]
    #[serial]
    fn test_env_budget_overrides_file() {
        let root = isolated_root();
        create_test_config_file(root.path(), "[llm.openrouter]\nbudget = 10\n");

        unsafe { std::env::set_var("STORYLOOM_LLM_BUDGET", "42") };
        let result = Config::discover_from(root.path(), &CliArgs::default());
        unsafe { std::env::remove_var("STORYLOOM_LLM_BUDGET") };

        let config = result.unwrap();
        assert_eq!(config.llm.openrouter.as_ref().and_then(|o| o.budget), Some(42));
        assert_eq!(config.source_attribution["llm_budget"], ConfigSource::Env);
    }

    #[test]
    #[serial]
    fn test_cli_toggles_disable_passes() {
        let root = isolated_root();
        let cli = CliArgs {
            no_scrub: true,
            no_chapter_revision: true,
            edit_pass: true,
            translate: Some("French".to_string()),
            ..CliArgs::default()
        };
        let config = Config::discover_from(root.path(), &cli).unwrap();

        assert_eq!(config.passes.scrub, Some(false));
        assert_eq!(config.passes.edit, Some(true));
        assert_eq!(config.revisions.chapter_enabled, Some(false));
        assert_eq!(config.passes.translate.as_deref(), Some("French"));
    }

    #[test]
    fn test_model_for_falls_back_to_provider_model() {
        let mut config = Config::default();
        assert_eq!(config.model_for(ModelRole::Info), "");

        config.llm.openrouter = Some(OpenRouterConfig {
            model: Some("provider/model".to_string()),
            ..OpenRouterConfig::default()
        });
        assert_eq!(config.model_for(ModelRole::Info), "provider/model");

        config.models.default = Some("default/model".to_string());
        assert_eq!(config.model_for(ModelRole::Info), "default/model");
    }

    #[test]
    fn test_effective_config_reports_sources() {
        let mut config = Config::default();
        config
            .source_attribution
            .insert("seed".to_string(), ConfigSource::Cli);

        let effective = config.effective_config();
        assert_eq!(effective["seed"], ("12".to_string(), "cli".to_string()));
        assert_eq!(
            effective["quality_threshold"],
            ("85".to_string(), "default".to_string())
        );
    }
}
