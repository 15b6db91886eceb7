//! Structured payload extraction with bounded self-repair.
//!
//! Models asked for JSON reply with fences, prose, or truncated objects. The
//! extractor strips fences, decodes, and on failure asks the model to resend
//! the bare payload, quoting the decode error. Every attempt is appended to
//! the session, so the session ends up holding the full repair transcript.
//! When the budget runs out the payload's sentinel is returned instead of an
//! error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use storyloom_config::DEFAULT_EXTRACTION_ATTEMPTS;
use storyloom_utils::StoryloomError;
use tracing::{debug, warn};

use crate::purpose::Purpose;
use crate::session::{BackendTarget, ConversationSession, GenerationOptions, Generator};

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*```[A-Za-z0-9_-]*\s*$").expect("valid fence regex"));

/// A JSON payload the extractor can decode.
pub trait StructuredPayload: DeserializeOwned + Send {
    /// Value returned when every attempt failed.
    fn sentinel() -> Self;

    /// Example of the expected shape, quoted in repair requests.
    fn shape() -> &'static str;
}

/// Outcome of an extraction. `ok == false` means `value` is the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<T> {
    pub value: T,
    pub ok: bool,
    pub attempts: u32,
}

/// Decodes structured payloads out of the last assistant message.
#[derive(Debug, Clone, Copy)]
pub struct StructuredResponseExtractor {
    max_attempts: u32,
}

impl Default for StructuredResponseExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_EXTRACTION_ATTEMPTS)
    }
}

impl StructuredResponseExtractor {
    /// `max_attempts` counts the initial parse; values below 1 are raised to 1.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decode `T` from the session's last assistant message, repairing as needed.
    ///
    /// # Errors
    ///
    /// Only generation failures (transport, cancellation) are returned. Decode
    /// failures end in the sentinel.
    pub async fn extract<T: StructuredPayload>(
        &self,
        generator: &Generator,
        session: &mut ConversationSession,
        target: &BackendTarget,
        purpose: Purpose,
    ) -> Result<Extracted<T>, StoryloomError> {
        let mut attempt = 1;
        loop {
            let error = match session.last_assistant() {
                Some(raw) => match decode::<T>(raw) {
                    Ok(value) => {
                        debug!(%purpose, attempt, "Structured payload decoded");
                        return Ok(Extracted {
                            value,
                            ok: true,
                            attempts: attempt,
                        });
                    }
                    Err(e) => e,
                },
                None => "no response to decode".to_string(),
            };

            if attempt >= self.max_attempts {
                warn!(
                    %purpose,
                    attempts = attempt,
                    error = %error,
                    "Structured payload never decoded, using fallback value"
                );
                return Ok(Extracted {
                    value: T::sentinel(),
                    ok: false,
                    attempts: attempt,
                });
            }

            debug!(%purpose, attempt, error = %error, "Requesting payload repair");
            session.push_user(repair_request(&error, T::shape()));
            let options = GenerationOptions::new(purpose)
                .structured()
                .seed(generator.seed().wrapping_add(u64::from(attempt)));
            generator.generate(session, target, &options).await?;
            attempt += 1;
        }
    }
}

/// Follow-up message asking the model to resend only the payload.
#[must_use]
pub fn repair_request(error: &str, shape: &str) -> String {
    format!(
        "Your previous reply could not be parsed as JSON ({error}).\n\
         Reply again with only the JSON object, no code fences and no commentary, \
         in exactly this shape:\n{shape}"
    )
}

/// Remove markdown fence lines, keeping whatever sits between them.
#[must_use]
pub fn strip_fences(raw: &str) -> String {
    FENCE.replace_all(raw, "").trim().to_string()
}

/// Decode `T` from a raw reply.
///
/// Falls back to the outermost `{ ... }` slice when the reply has prose around
/// the object.
///
/// # Errors
///
/// Returns the decode error text, suitable for quoting back to the model.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return Err("the reply was empty".to_string());
    }
    let first_error = match serde_json::from_str::<T>(&text) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str::<T>(&text[start..=end])
    {
        return Ok(value);
    }
    Err(first_error)
}

/// `{"TotalChapters": n}`. Sentinel: -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterCountPayload {
    #[serde(rename = "TotalChapters")]
    pub total_chapters: i64,
}

impl StructuredPayload for ChapterCountPayload {
    fn sentinel() -> Self {
        Self { total_chapters: -1 }
    }

    fn shape() -> &'static str {
        r#"{"TotalChapters": <number>}"#
    }
}

/// `{"IsComplete": bool, "Score": 0-100}`. Sentinel: incomplete, no score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingPayload {
    #[serde(rename = "IsComplete")]
    pub is_complete: bool,
    #[serde(rename = "Score", default)]
    pub score: Option<f64>,
}

impl StructuredPayload for RatingPayload {
    fn sentinel() -> Self {
        Self {
            is_complete: false,
            score: None,
        }
    }

    fn shape() -> &'static str {
        r#"{"IsComplete": true or false, "Score": <0-100>}"#
    }
}

/// `{"Suggestions": text, "DidFollowOutline": bool}`. Sentinel: not followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdherencePayload {
    #[serde(rename = "Suggestions", default)]
    pub suggestions: String,
    #[serde(rename = "DidFollowOutline")]
    pub did_follow_outline: bool,
}

impl StructuredPayload for AdherencePayload {
    fn sentinel() -> Self {
        Self {
            suggestions: String::new(),
            did_follow_outline: false,
        }
    }

    fn shape() -> &'static str {
        r#"{"Suggestions": "<what to change>", "DidFollowOutline": true or false}"#
    }
}

/// `{"Scenes": [text, ...]}`. Sentinel: no scenes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenePlan {
    #[serde(rename = "Scenes")]
    pub scenes: Vec<String>,
}

impl StructuredPayload for ScenePlan {
    fn sentinel() -> Self {
        Self { scenes: Vec::new() }
    }

    fn shape() -> &'static str {
        r#"{"Scenes": ["<scene 1 outline>", "<scene 2 outline>"]}"#
    }
}

/// `{"Title", "Summary", "Tags", "Score"}` describing the finished outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryInfo {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Summary", default)]
    pub summary: String,
    #[serde(rename = "Tags", default)]
    pub tags: String,
    #[serde(rename = "Score", default)]
    pub score: f64,
}

impl StructuredPayload for StoryInfo {
    fn sentinel() -> Self {
        Self {
            title: String::new(),
            summary: String::new(),
            tags: String::new(),
            score: 0.0,
        }
    }

    fn shape() -> &'static str {
        r#"{"Title": "<title>", "Summary": "<one paragraph>", "Tags": "<comma separated>", "Score": <0-100>}"#
    }
}
