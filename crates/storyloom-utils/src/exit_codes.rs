//! Exit code constants for storyloom.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Story written |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 70 | `GENERATION_FAILURE` | Backend failed after exhausting retries |
//! | 74 | `IO_FAILURE` | Checkpoint or output file could not be written |
//! | 130 | `INTERRUPTED` | Run cancelled (Ctrl-C) |

/// Exit codes matching the documented exit code table.
///
/// Use the named constants for common exit codes, or [`as_i32()`](Self::as_i32)
/// to get the numeric value for `std::process::exit()`.
///
/// ```rust
/// use storyloom_utils::exit_codes::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::from_i32(130), ExitCode::INTERRUPTED);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - the story was generated and written
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid arguments or configuration
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Generation failure - the backend gave up after its retries
    pub const GENERATION_FAILURE: ExitCode = ExitCode(70);

    /// I/O failure - checkpoint or output write failed
    pub const IO_FAILURE: ExitCode = ExitCode(74);

    /// Interrupted - cancellation was requested
    pub const INTERRUPTED: ExitCode = ExitCode(130);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    /// Short machine-readable name, used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "success",
            2 => "cli_args",
            70 => "generation_failure",
            74 => "io_failure",
            130 => "interrupted",
            _ => "internal",
        }
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}
