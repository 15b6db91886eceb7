use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::exit_codes::ExitCode;
pub use crate::run_title::RunTitleError;

/// Library-level error type with rich context and user-friendly reporting.
///
/// `StoryloomError` is the error returned by every fallible storyloom library
/// operation. Errors fall into a small taxonomy:
///
/// | Variant | Meaning | Run outcome |
/// |---------|---------|-------------|
/// | `Llm` | backend exhausted its transport retries | fatal |
/// | `Checkpoint` | checkpoint store could not be written or read | fatal (corruption is recovered by the orchestrator before it surfaces) |
/// | `Cancelled` | cancellation observed at a generation boundary | fatal, checkpoints kept |
/// | `PhaseFailed` | any of the above, tagged with the orchestrator phase | fatal |
/// | `Config` / `RunTitle` | invalid settings or run identity | fatal before work starts |
///
/// Structured-decode failures and quality non-convergence are deliberately
/// absent: they resolve to sentinel values and degradation records.
///
/// Use [`display_for_user()`](Self::display_for_user) for terminal output and
/// [`to_exit_code()`](Self::to_exit_code) for the process exit status.
#[derive(Error, Debug)]
pub enum StoryloomError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Run title error: {0}")]
    RunTitle(#[from] RunTitleError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Run interrupted during {phase}")]
    Cancelled { phase: String },

    #[error("Phase {phase} failed: {source}")]
    PhaseFailed {
        phase: String,
        #[source]
        source: Box<StoryloomError>,
    },

    #[error("Failed to write final output at {path}: {reason}")]
    OutputWriteFailed { path: String, reason: String },
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Generation,
    Checkpoint,
    FileSystem,
    Validation,
    Interrupted,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Generation => write!(f, "Generation"),
            Self::Checkpoint => write!(f, "Checkpoint"),
            Self::FileSystem => write!(f, "File System"),
            Self::Validation => write!(f, "Validation"),
            Self::Interrupted => write!(f, "Interrupted"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration discovery failed: {reason}")]
    DiscoveryFailed { reason: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => {
                format!("Configuration file has invalid format: {reason}")
            }
            Self::MissingRequired(key) => {
                format!("Required configuration '{key}' is missing")
            }
            Self::InvalidValue { key, value } => {
                format!("Configuration '{key}' has invalid value: {value}")
            }
            Self::NotFound { path } => {
                format!("Configuration file not found: {path}")
            }
            Self::DiscoveryFailed { reason } => {
                format!("Failed to discover configuration: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidFile(_) => Some(
                "Configuration files must be valid TOML with [generation], [revisions], [passes], [models], [llm] and [output] sections."
                    .to_string(),
            ),
            Self::MissingRequired(_) => Some(
                "Some configuration values are required before a run can start.".to_string(),
            ),
            Self::InvalidValue { key, .. } => Some(format!(
                "The '{key}' configuration option has specific range requirements."
            )),
            Self::NotFound { .. } | Self::DiscoveryFailed { .. } => Some(
                "storyloom searches for .storyloom/config.toml starting from the current directory upward."
                    .to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax using a TOML validator".to_string(),
                "Remove unknown sections or keys".to_string(),
            ],
            Self::MissingRequired(key) => vec![
                format!("Add '{key}' to .storyloom/config.toml"),
                "Use CLI flags as a temporary workaround".to_string(),
            ],
            Self::InvalidValue { key, .. } => match key.as_str() {
                "quality_threshold" => vec!["Use a value between 0 and 100".to_string()],
                "outline_min" | "outline_max" | "chapter_min" | "chapter_max" => vec![
                    "Keep min revisions less than or equal to max revisions".to_string(),
                    "Keep max revisions at or below 20".to_string(),
                ],
                "llm_provider" => vec!["Use 'openrouter' as the provider".to_string()],
                _ => vec![
                    "Check the documentation for valid values for this option".to_string(),
                    "Remove the option to use the default value".to_string(),
                ],
            },
            Self::NotFound { .. } => vec![
                "Create .storyloom/config.toml in your project root".to_string(),
                "Use CLI flags instead of a configuration file".to_string(),
            ],
            Self::DiscoveryFailed { .. } => vec![
                "Check read permissions on the directory tree".to_string(),
                "Use --config <path> to specify the configuration file explicitly".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Errors from LLM backend invocation
///
/// Every variant is a transport-level outcome: the backend either could not be
/// reached, refused the request, or gave up after its own bounded retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Transport-level failure (HTTP connectivity, malformed provider response)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    /// Invocation timed out
    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Budget limit exceeded
    #[error("Budget exceeded: attempted {attempted} calls, limit is {limit}")]
    BudgetExceeded { limit: u32, attempted: u32 },

    /// Configuration error
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Unsupported feature or provider
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl UserFriendlyError for LlmError {
    fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("LLM transport error: {msg}"),
            Self::ProviderAuth(msg) => format!("LLM provider authentication failed: {msg}"),
            Self::ProviderQuota(msg) => format!("LLM provider quota exceeded: {msg}"),
            Self::ProviderOutage(msg) => format!("LLM provider service outage: {msg}"),
            Self::Timeout { duration } => {
                format!("LLM invocation timed out after {duration:?}")
            }
            Self::BudgetExceeded { limit, attempted } => {
                format!("LLM budget exceeded: attempted {attempted} calls, limit is {limit}")
            }
            Self::Misconfiguration(msg) => format!("LLM configuration error: {msg}"),
            Self::Unsupported(msg) => format!("LLM feature not supported: {msg}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) | Self::Timeout { .. } => Some(
                "The generation backend failed after exhausting its retries. Completed milestones are checkpointed."
                    .to_string(),
            ),
            Self::ProviderAuth(_) => {
                Some("The provider rejected the configured credentials.".to_string())
            }
            Self::ProviderQuota(_) => {
                Some("The provider is rate limiting or the account is out of credit.".to_string())
            }
            Self::BudgetExceeded { .. } => Some(
                "storyloom caps the number of backend calls per process to bound cost.".to_string(),
            ),
            Self::Misconfiguration(_) | Self::Unsupported(_) => {
                Some("The [llm] configuration section is incomplete or invalid.".to_string())
            }
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) | Self::Timeout { .. } => vec![
                "Rerun the same command to resume from the last checkpoint".to_string(),
                "Increase [llm] timeout_secs for slow models".to_string(),
            ],
            Self::ProviderAuth(_) => vec![
                "Export the API key in the variable named by [llm.openrouter] api_key_env"
                    .to_string(),
            ],
            Self::ProviderQuota(_) => vec![
                "Wait for the rate limit window to pass, then resume".to_string(),
                "Check the provider account balance".to_string(),
            ],
            Self::BudgetExceeded { .. } => vec![
                "Raise [llm.openrouter] budget or set STORYLOOM_LLM_BUDGET".to_string(),
                "Rerun to resume; completed milestones are not regenerated".to_string(),
            ],
            Self::Misconfiguration(_) | Self::Unsupported(_) => vec![
                "Set [llm] provider = \"openrouter\" and a model in [llm.openrouter]".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Misconfiguration(_) | Self::Unsupported(_) => ErrorCategory::Configuration,
            _ => ErrorCategory::Generation,
        }
    }
}

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed for '{key}' at {path}: {reason}")]
    Io {
        key: String,
        path: String,
        reason: String,
    },

    #[error("Checkpoint '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Checkpoint '{key}' could not be encoded: {reason}")]
    Encode { key: String, reason: String },
}

impl UserFriendlyError for CheckpointError {
    fn user_message(&self) -> String {
        match self {
            Self::Io { key, path, reason } => {
                format!("Could not access checkpoint '{key}' at {path}: {reason}")
            }
            Self::Corrupt { key, reason } => {
                format!("Checkpoint '{key}' could not be decoded: {reason}")
            }
            Self::Encode { key, reason } => {
                format!("Checkpoint '{key}' could not be serialized: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        Some(
            "Checkpoints let an interrupted run resume from its last completed milestone."
                .to_string(),
        )
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Io { .. } => vec![
                "Check free disk space and permissions on the checkpoint directory".to_string(),
            ],
            Self::Corrupt { .. } => vec![
                "Run 'storyloom clean --title <title>' to discard the run's checkpoints"
                    .to_string(),
            ],
            Self::Encode { .. } => vec!["Report this as a bug".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Checkpoint
    }
}

impl UserFriendlyError for StoryloomError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(e) => e.user_message(),
            Self::Llm(e) => e.user_message(),
            Self::Checkpoint(e) => e.user_message(),
            Self::RunTitle(e) => e.user_message(),
            Self::Io(e) => format!("File operation failed: {e}"),
            Self::Cancelled { phase } => format!("Run was interrupted during the {phase} phase"),
            Self::PhaseFailed { phase, source } => {
                format!("The {phase} phase failed: {}", source.user_message())
            }
            Self::OutputWriteFailed { path, reason } => {
                format!("Could not write the finished story to {path}: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(e) => e.context(),
            Self::Llm(e) => e.context(),
            Self::Checkpoint(e) => e.context(),
            Self::RunTitle(e) => e.context(),
            Self::Io(_) | Self::OutputWriteFailed { .. } => None,
            Self::Cancelled { .. } => Some(
                "Cancellation is honoured between backend requests; completed milestones are kept."
                    .to_string(),
            ),
            Self::PhaseFailed { source, .. } => source.context(),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(e) => e.suggestions(),
            Self::Llm(e) => e.suggestions(),
            Self::Checkpoint(e) => e.suggestions(),
            Self::RunTitle(e) => e.suggestions(),
            Self::Io(_) | Self::OutputWriteFailed { .. } => {
                vec!["Check permissions and free space on the output directory".to_string()]
            }
            Self::Cancelled { .. } => {
                vec!["Rerun the same command to resume from the last checkpoint".to_string()]
            }
            Self::PhaseFailed { source, .. } => {
                let mut suggestions = source.suggestions();
                suggestions.push(
                    "Partial checkpoints remain; rerun with the same --title to resume"
                        .to_string(),
                );
                suggestions
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(e) => e.category(),
            Self::Llm(e) => e.category(),
            Self::Checkpoint(e) => e.category(),
            Self::RunTitle(e) => e.category(),
            Self::Io(_) | Self::OutputWriteFailed { .. } => ErrorCategory::FileSystem,
            Self::Cancelled { .. } => ErrorCategory::Interrupted,
            Self::PhaseFailed { source, .. } => source.category(),
        }
    }
}

impl StoryloomError {
    /// Attribute this error to an orchestrator phase.
    ///
    /// Cancellation keeps its own variant with the phase filled in; errors that
    /// already carry a phase are returned unchanged.
    #[must_use]
    pub fn in_phase(self, phase: impl Into<String>) -> Self {
        match self {
            Self::Cancelled { .. } => Self::Cancelled {
                phase: phase.into(),
            },
            err @ Self::PhaseFailed { .. } => err,
            other => Self::PhaseFailed {
                phase: phase.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether the error must end the current run.
    ///
    /// Revision and gate loops swallow non-fatal failures as "reject"; fatal
    /// ones propagate.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Llm(_) | Self::Cancelled { .. } | Self::Checkpoint(_) | Self::Io(_) => true,
            Self::PhaseFailed { source, .. } => source.is_fatal(),
            Self::Config(_) | Self::RunTitle(_) | Self::OutputWriteFailed { .. } => false,
        }
    }

    /// Whether this error (or the error it wraps) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::PhaseFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Get a user-friendly error message with context and actionable suggestions.
    ///
    /// ```text
    /// Error: <user message>
    ///
    /// Context: <context if available>
    ///
    /// Suggestions:
    ///   • <suggestion 1>
    /// ```
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut output = format!("Error: {}\n", self.user_message());

        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        output
    }

    /// Map this error to the CLI exit code.
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) | Self::RunTitle(_) => ExitCode::CLI_ARGS,
            Self::Llm(LlmError::Misconfiguration(_) | LlmError::Unsupported(_)) => {
                ExitCode::CLI_ARGS
            }
            Self::Llm(_) => ExitCode::GENERATION_FAILURE,
            Self::Checkpoint(_) | Self::Io(_) | Self::OutputWriteFailed { .. } => {
                ExitCode::IO_FAILURE
            }
            Self::Cancelled { .. } => ExitCode::INTERRUPTED,
            Self::PhaseFailed { source, .. } => source.to_exit_code(),
        }
    }
}
