//! Run title sanitization.
//!
//! A run title names the checkpoint namespace and seeds the output filename,
//! so it has to be safe as a single path component.

use crate::error::{ErrorCategory, UserFriendlyError};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, thiserror::Error)]
pub enum RunTitleError {
    #[error("Run title is empty after sanitization")]
    Empty,

    #[error("Run title contains only invalid characters")]
    OnlyInvalidCharacters,
}

impl UserFriendlyError for RunTitleError {
    fn user_message(&self) -> String {
        match self {
            Self::Empty => "The run title is empty".to_string(),
            Self::OnlyInvalidCharacters => {
                "The run title contains no letters, digits, dots or dashes".to_string()
            }
        }
    }

    fn context(&self) -> Option<String> {
        Some("Run titles name the checkpoint directory. Characters outside A-Z, a-z, 0-9, '.', '-' and '_' are replaced with underscores.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        vec![
            "Pass --title with at least one letter or digit".to_string(),
            "Example: --title lighthouse-keeper".to_string(),
        ]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

/// Sanitize a run title for filesystem use.
///
/// NFKC-normalizes, keeps `[A-Za-z0-9._-]`, replaces everything else with
/// `_`, and collapses `..` so the result can never climb out of its parent.
///
/// ```
/// use storyloom_utils::run_title::sanitize_run_title;
///
/// assert_eq!(sanitize_run_title("lighthouse-keeper").unwrap(), "lighthouse-keeper");
/// assert_eq!(sanitize_run_title("The Lighthouse!").unwrap(), "The_Lighthouse_");
/// assert_eq!(sanitize_run_title("ｓｔｏｒｙ").unwrap(), "story");
/// ```
pub fn sanitize_run_title(title: &str) -> Result<String, RunTitleError> {
    let normalized: String = title.trim().nfkc().collect();

    let mut sanitized: String = normalized
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "__");
    }

    if sanitized.is_empty() {
        return Err(RunTitleError::Empty);
    }
    if sanitized.chars().all(|c| c == '_') {
        return Err(RunTitleError::OnlyInvalidCharacters);
    }

    Ok(sanitized)
}

/// Title fragment used in story filenames: word characters only, spaces
/// become underscores, and the result is capped at 64 characters.
#[must_use]
pub fn filename_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    let capped: String = joined.chars().take(64).collect();
    if capped.is_empty() {
        "Untitled".to_string()
    } else {
        capped
    }
}
