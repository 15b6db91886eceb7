//! storyloom - checkpointed, self-correcting long-form fiction generation
//!
//! storyloom turns a short prompt into a multi-chapter story by driving an LLM
//! backend through outlining, staged chapter writing, quality-gated revision,
//! and optional post-passes. Every milestone is checkpointed, so an
//! interrupted run picks up where it stopped.
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! export OPENROUTER_API_KEY=...
//! storyloom write --prompt prompts/lighthouse.txt
//! storyloom status --title lighthouse
//! ```
//!
//! # Library
//!
//! The engine is usable without the CLI. Build a [`Generator`] over any
//! [`storyloom_llm::LlmBackend`], then hand it to a [`RunOrchestrator`]
//! together with a checkpoint store and an artifact sink:
//!
//! ```ignore
//! let settings = RunSettings::from_config(&config);
//! let backend = storyloom_llm::from_config(&config)?;
//! let port = LlmGenerationPort::new(backend, "lighthouse", settings.timeout);
//! let generator = Generator::new(Arc::new(port), CancelFlag::new(), settings.seed);
//! let orchestrator = RunOrchestrator::new(
//!     settings,
//!     generator,
//!     Arc::new(FileCheckpointStore::new(".storyloom/checkpoints")),
//!     Arc::new(StoryWriter::new("Stories")),
//! );
//! let report = orchestrator.run(&RunRequest::new("lighthouse", prompt)).await?;
//! ```

pub mod cli;

pub use storyloom_config::{CliArgs, Config, ModelRole};
pub use storyloom_engine::{
    ArtifactSink, CancelFlag, CheckpointStore, FileCheckpointStore, Generator, LlmGenerationPort,
    RunOrchestrator, RunReport, RunRequest, RunSettings, StoryWriter,
};
pub use storyloom_utils::{ExitCode, StoryloomError};

pub use storyloom_config as config;
pub use storyloom_engine as engine;
pub use storyloom_llm as llm;
pub use storyloom_utils as utils;
