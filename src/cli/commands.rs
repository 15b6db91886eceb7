//! CLI command implementations
//!
//! One `execute_*` handler per subcommand. Handlers print their own
//! progress; errors are returned to `run` for reporting.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use storyloom_config::{Config, DEFAULT_CHECKPOINT_DIR, DEFAULT_OUTPUT_DIR};
use storyloom_engine::{
    CancelFlag, CheckpointStore, Checkpointer, FileCheckpointStore, Generator, LlmGenerationPort,
    RunCheckpoint, RunNamespace, RunOrchestrator, RunRequest, RunSettings, StoryWriter,
};
use storyloom_utils::StoryloomError;

use super::args::WriteArgs;

fn utf8_dir(value: Option<&String>, default: &str) -> Result<Utf8PathBuf> {
    let raw = value.map_or(default, String::as_str);
    Utf8PathBuf::try_from(std::path::PathBuf::from(raw))
        .with_context(|| format!("Directory path is not valid UTF-8: {raw}"))
}

fn checkpoint_store(config: &Config) -> Result<FileCheckpointStore> {
    let dir = utf8_dir(config.output.checkpoint_dir.as_ref(), DEFAULT_CHECKPOINT_DIR)?;
    Ok(FileCheckpointStore::new(dir))
}

/// Run title for a prompt file: the explicit title, else the file stem.
pub(crate) fn run_title(explicit: Option<&str>, prompt: &Path) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| {
            prompt
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "story".to_string())
}

/// Output name for the `n`th of several runs sharing one `--output`.
pub(crate) fn output_name(output: Option<&str>, n: u32) -> Option<String> {
    let name = output?;
    let stem = name.strip_suffix(".md").unwrap_or(name);
    Some(if n <= 1 {
        stem.to_string()
    } else {
        format!("{stem}-{n}")
    })
}

// ============================================================================
// Write Command
// ============================================================================

/// Generate `args.times` stories from the prompt file.
pub async fn execute_write_command(
    args: &WriteArgs,
    verbose: bool,
    config: &Config,
    cancel: &CancelFlag,
) -> Result<()> {
    let prompt = std::fs::read_to_string(&args.prompt)
        .with_context(|| format!("Failed to read prompt file {}", args.prompt.display()))?;
    if prompt.trim().is_empty() {
        anyhow::bail!("Prompt file {} is empty", args.prompt.display());
    }

    let title = run_title(args.title.as_deref(), &args.prompt);
    let settings = RunSettings::from_config(config);
    let store: Arc<dyn CheckpointStore> = Arc::new(checkpoint_store(config)?);
    let output_dir = utf8_dir(config.output.dir.as_ref(), DEFAULT_OUTPUT_DIR)?;

    for n in 1..=args.times {
        let namespace = RunNamespace::numbered(&title, n).map_err(StoryloomError::from)?;
        if args.fresh {
            Checkpointer::new(Arc::clone(&store), namespace.clone()).clear()?;
            info!(run = %namespace, "Cleared checkpoints before starting");
        }

        let backend = storyloom_llm::from_config(config).map_err(StoryloomError::from)?;
        let port = LlmGenerationPort::new(backend, namespace.as_str(), settings.timeout);
        let generator = Generator::new(Arc::new(port), cancel.clone(), settings.seed);
        let writer = StoryWriter::new(output_dir.clone())
            .with_name(output_name(args.output.as_deref(), n));

        let orchestrator = RunOrchestrator::new(
            settings.clone(),
            generator,
            Arc::clone(&store),
            Arc::new(writer),
        );
        let report = orchestrator
            .run(&RunRequest::new(namespace.as_str(), prompt.clone()))
            .await?;

        println!(
            "✓ {} ({} chapters, {} words)",
            report.metadata.title, report.metadata.chapter_count, report.metadata.word_count
        );
        if let Some(path) = &report.saved.markdown {
            println!("  Saved to {path}");
        }
        if !report.metadata.degraded.is_empty() {
            println!("  {} step(s) finished below the quality bar", report.metadata.degraded.len());
        }
        if verbose {
            println!("{}", report.timing_summary());
        }
    }
    Ok(())
}

// ============================================================================
// Status Command
// ============================================================================

pub fn execute_status_command(title: &str, config: &Config) -> Result<()> {
    let namespace = RunNamespace::from_title(title).map_err(StoryloomError::from)?;
    let store: Arc<dyn CheckpointStore> = Arc::new(checkpoint_store(config)?);
    let view = RunCheckpoint::restore(store, namespace.clone())?;

    if view.is_empty() {
        println!("No checkpoints for '{namespace}'");
        return Ok(());
    }
    println!("Checkpoints for '{namespace}':");
    for line in view.describe() {
        println!("  ✓ {line}");
    }
    Ok(())
}

// ============================================================================
// Clean Command
// ============================================================================

pub fn execute_clean_command(title: &str, config: &Config) -> Result<()> {
    let namespace = RunNamespace::from_title(title).map_err(StoryloomError::from)?;
    let store: Arc<dyn CheckpointStore> = Arc::new(checkpoint_store(config)?);
    Checkpointer::new(store, namespace.clone()).clear()?;
    println!("✓ Cleared checkpoints for '{namespace}'");
    Ok(())
}
