//! CLI argument definitions
//!
//! Every generation flag maps onto a [`CliArgs`] field, so flags share the
//! precedence rules of the configuration layer (CLI > env > file > defaults).

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use storyloom_config::{CliArgs, ModelRole, ModelsConfig};

/// storyloom - checkpointed long-form fiction generation
#[derive(Parser)]
#[command(name = "storyloom")]
#[command(about = "Generate long-form fiction through a resumable, self-correcting LLM pipeline")]
#[command(long_about = r#"
storyloom turns a short prompt into a complete multi-chapter story. It outlines,
counts and expands chapters, writes each chapter in gated stages, revises until
a quality bar is met, and then runs optional edit, scrub and translation passes.

Every milestone is checkpointed. An interrupted run resumes where it stopped
when started again with the same --title.

EXAMPLES:
  # Write a story from a prompt file
  storyloom write --prompt prompts/lighthouse.txt

  # Three stories from the same prompt, with the edit pass enabled
  storyloom write --prompt prompts/lighthouse.txt --times 3 --edit-pass

  # Show which milestones a run has completed
  storyloom status --title lighthouse

  # Drop the checkpoints of a run
  storyloom clean --title lighthouse

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > environment > config file > defaults
  The config file is discovered by searching upward from CWD for .storyloom/config.toml
  Use --config to specify an explicit config file path
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// LLM provider to use (openrouter)
    #[arg(long, global = true)]
    pub llm_provider: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a story from a prompt file
    ///
    /// EXAMPLES:
    ///   storyloom write --prompt idea.txt
    ///   storyloom write --prompt idea.txt --title harbor --seed 7 --no-scrub
    Write(Box<WriteArgs>),

    /// List the completed milestones of a run
    Status {
        /// Run title (as given to `write`)
        #[arg(long)]
        title: String,
    },

    /// Remove the checkpoints of a run
    Clean {
        /// Run title (as given to `write`)
        #[arg(long)]
        title: String,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct WriteArgs {
    /// File holding the story prompt
    #[arg(long)]
    pub prompt: PathBuf,

    /// Run title; names the checkpoint namespace (default: prompt file stem)
    #[arg(long)]
    pub title: Option<String>,

    /// Number of stories to generate, one after another
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub times: u32,

    /// Output file name (without extension) instead of the numbered default
    #[arg(long)]
    pub output: Option<String>,

    /// Discard existing checkpoints before starting
    #[arg(long)]
    pub fresh: bool,

    /// Deterministic seed for every generation call
    #[arg(long)]
    pub seed: Option<u64>,

    /// Score (0-100) a rating must reach before revision stops
    #[arg(long)]
    pub quality_threshold: Option<u8>,

    #[arg(long)]
    pub outline_min_revisions: Option<u32>,

    #[arg(long)]
    pub outline_max_revisions: Option<u32>,

    #[arg(long)]
    pub chapter_min_revisions: Option<u32>,

    #[arg(long)]
    pub chapter_max_revisions: Option<u32>,

    /// Skip the chapter revision loop
    #[arg(long)]
    pub no_chapter_revision: bool,

    /// Skip the scrub pass
    #[arg(long)]
    pub no_scrub: bool,

    /// Do not expand per-chapter outlines
    #[arg(long)]
    pub no_expand_outline: bool,

    /// Write stage 1 as a single plot pass instead of scene by scene
    #[arg(long)]
    pub no_scene_pipeline: bool,

    /// Run the whole-manuscript edit pass
    #[arg(long)]
    pub edit_pass: bool,

    /// Translate the finished story into this language
    #[arg(long)]
    pub translate: Option<String>,

    /// Translate the prompt into this language before outlining
    #[arg(long)]
    pub translate_prompt: Option<String>,

    #[command(flatten)]
    pub models: ModelArgs,
}

/// Per-role model overrides.
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Model used for every role without its own override
    #[arg(long = "model")]
    pub default: Option<String>,
    #[arg(long)]
    pub initial_outline_model: Option<String>,
    #[arg(long)]
    pub chapter_outline_model: Option<String>,
    #[arg(long)]
    pub chapter_stage1_model: Option<String>,
    #[arg(long)]
    pub chapter_stage2_model: Option<String>,
    #[arg(long)]
    pub chapter_stage3_model: Option<String>,
    #[arg(long)]
    pub chapter_revision_model: Option<String>,
    #[arg(long)]
    pub revision_model: Option<String>,
    #[arg(long)]
    pub eval_model: Option<String>,
    #[arg(long)]
    pub info_model: Option<String>,
    #[arg(long)]
    pub scrub_model: Option<String>,
    #[arg(long)]
    pub checker_model: Option<String>,
    #[arg(long)]
    pub translator_model: Option<String>,
}

impl ModelArgs {
    fn role(&self, role: ModelRole) -> Option<String> {
        match role {
            ModelRole::InitialOutline => self.initial_outline_model.clone(),
            ModelRole::ChapterOutline => self.chapter_outline_model.clone(),
            ModelRole::ChapterStage1 => self.chapter_stage1_model.clone(),
            ModelRole::ChapterStage2 => self.chapter_stage2_model.clone(),
            ModelRole::ChapterStage3 => self.chapter_stage3_model.clone(),
            ModelRole::ChapterRevision => self.chapter_revision_model.clone(),
            ModelRole::Revision => self.revision_model.clone(),
            ModelRole::Eval => self.eval_model.clone(),
            ModelRole::Info => self.info_model.clone(),
            ModelRole::Scrub => self.scrub_model.clone(),
            ModelRole::Checker => self.checker_model.clone(),
            ModelRole::Translator => self.translator_model.clone(),
        }
    }

    #[must_use]
    pub fn to_config(&self) -> ModelsConfig {
        use strum::IntoEnumIterator;

        let mut models = ModelsConfig {
            default: self.default.clone(),
            ..ModelsConfig::default()
        };
        for role in ModelRole::iter() {
            models.set(role, self.role(role));
        }
        models
    }
}

impl Cli {
    /// Configuration overrides for this invocation.
    #[must_use]
    pub fn config_args(&self) -> CliArgs {
        let mut args = CliArgs {
            config_path: self.config.clone(),
            llm_provider: self.llm_provider.clone(),
            ..CliArgs::default()
        };
        if let Commands::Write(write) = &self.command {
            args.seed = write.seed;
            args.quality_threshold = write.quality_threshold;
            args.outline_min_revisions = write.outline_min_revisions;
            args.outline_max_revisions = write.outline_max_revisions;
            args.chapter_min_revisions = write.chapter_min_revisions;
            args.chapter_max_revisions = write.chapter_max_revisions;
            args.no_chapter_revision = write.no_chapter_revision;
            args.no_scrub = write.no_scrub;
            args.no_expand_outline = write.no_expand_outline;
            args.no_scene_pipeline = write.no_scene_pipeline;
            args.edit_pass = write.edit_pass;
            args.translate = write.translate.clone();
            args.translate_prompt = write.translate_prompt.clone();
            args.models = write.models.to_config();
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn write_flags_map_onto_config_args() {
        let cli = Cli::try_parse_from([
            "storyloom",
            "--llm-provider",
            "openrouter",
            "write",
            "--prompt",
            "idea.txt",
            "--seed",
            "7",
            "--no-scrub",
            "--edit-pass",
            "--model",
            "base/model",
            "--eval-model",
            "judge/model",
        ])
        .unwrap();

        let args = cli.config_args();
        assert_eq!(args.seed, Some(7));
        assert!(args.no_scrub);
        assert!(args.edit_pass);
        assert_eq!(args.llm_provider.as_deref(), Some("openrouter"));
        assert_eq!(args.models.default.as_deref(), Some("base/model"));
        assert_eq!(args.models.get(ModelRole::Eval).map(String::as_str), Some("judge/model"));
        assert_eq!(args.models.get(ModelRole::Checker), None);
    }

    #[test]
    fn times_must_be_positive() {
        assert!(Cli::try_parse_from(["storyloom", "write", "--prompt", "p", "--times", "0"]).is_err());
    }
}
