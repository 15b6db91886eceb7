//! Generation engine for storyloom.
//!
//! The engine turns a prompt into a finished manuscript through a fixed,
//! resumable sequence of phases. Its building blocks are usable on their own:
//!
//! - [`session`]: conversations and the [`GenerationPort`] seam to a backend
//! - [`extract`]: structured payload extraction with bounded repair
//! - [`revision`]: the quality-gated critique/rate/revise loop
//! - [`pipeline`]: gated, ordered generation stages
//! - [`orchestrator`]: the run itself, checkpointed after every milestone

pub mod chapter;
pub mod checkpoint;
pub mod critique;
pub mod extract;
pub mod orchestrator;
pub mod outline;
pub mod output;
pub mod passes;
pub mod pipeline;
pub mod prompts;
pub mod purpose;
pub mod revision;
pub mod scenes;
pub mod session;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use checkpoint::{
    CheckpointKey, CheckpointStore, Checkpointer, FileCheckpointStore, MemoryCheckpointStore,
    RunCheckpoint, RunNamespace,
};
pub use extract::{Extracted, StructuredPayload, StructuredResponseExtractor};
pub use orchestrator::{RunOrchestrator, RunPhase, RunReport, RunRequest};
pub use output::{ArtifactSink, Degradation, SavedStory, StoryMetadata, StoryWriter};
pub use passes::PassKind;
pub use pipeline::{AcceptabilityCheck, GateVerdict, StageKind, StageResult, StagedPipeline};
pub use purpose::Purpose;
pub use revision::{
    Critic, QualityGatedRevisionLoop, Rating, RevisionOutcome, RevisionPolicy, Reviser, StopReason,
};
pub use session::{
    BackendTarget, CancelFlag, ConversationSession, GenerationOptions, GenerationPort,
    Generator, LlmGenerationPort,
};
pub use settings::{ModelRoles, RunSettings, SettingsSummary};
