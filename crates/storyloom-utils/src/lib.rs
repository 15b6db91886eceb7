//! Foundation utilities for storyloom: the error taxonomy, exit codes,
//! atomic file writes, logging setup, and run title handling.

pub mod atomic_write;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod run_title;
pub mod stats;

pub use error::{
    CheckpointError, ConfigError, ErrorCategory, LlmError, StoryloomError, UserFriendlyError,
};
pub use exit_codes::ExitCode;
