//! Checkpoint store and milestone payloads.
//!
//! Checkpoints live under a [`RunNamespace`] derived from the run title and
//! are keyed by milestone. The file store wraps every payload in an envelope
//! carrying a BLAKE3 hash of the canonical (JCS) payload, so truncated or
//! hand-edited files are detected as corrupt on load.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use storyloom_utils::atomic_write::write_file_atomic;
use storyloom_utils::run_title::{RunTitleError, sanitize_run_title};
use storyloom_utils::{CheckpointError, StoryloomError};
use tracing::{debug, warn};

use crate::extract::StoryInfo;
use crate::output::Degradation;
use crate::passes::PassKind;

pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Sanitized run title; the unit of checkpoint isolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunNamespace(String);

impl RunNamespace {
    /// # Errors
    ///
    /// Returns `RunTitleError` when nothing usable is left after sanitizing.
    pub fn from_title(title: &str) -> Result<Self, RunTitleError> {
        let sanitized = sanitize_run_title(title)?;
        if sanitized == "." {
            return Err(RunTitleError::OnlyInvalidCharacters);
        }
        Ok(Self(sanitized))
    }

    /// Namespace for the `n`th of several runs of the same title (1-based).
    ///
    /// # Errors
    ///
    /// See [`Self::from_title`].
    pub fn numbered(title: &str, n: u32) -> Result<Self, RunTitleError> {
        if n <= 1 {
            Self::from_title(title)
        } else {
            Self::from_title(&format!("{title}-{n}"))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milestone keys, ordered as the run produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckpointKey {
    TranslatedPrompt,
    Outline,
    StoryInfo,
    ChapterCount,
    ChapterOutline(usize),
    Chapter(usize),
    Pass(PassKind),
}

impl CheckpointKey {
    /// Parse a key as written by `Display`.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "translated-prompt" => return Some(Self::TranslatedPrompt),
            "outline" => return Some(Self::Outline),
            "story-info" => return Some(Self::StoryInfo),
            "chapter-count" => return Some(Self::ChapterCount),
            "pass-edit" => return Some(Self::Pass(PassKind::Edit)),
            "pass-scrub" => return Some(Self::Pass(PassKind::Scrub)),
            "pass-translate" => return Some(Self::Pass(PassKind::Translate)),
            _ => {}
        }
        if let Some(n) = key.strip_prefix("chapter-outline-") {
            return n.parse().ok().map(Self::ChapterOutline);
        }
        key.strip_prefix("chapter-")
            .and_then(|n| n.parse().ok())
            .map(Self::Chapter)
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TranslatedPrompt => f.write_str("translated-prompt"),
            Self::Outline => f.write_str("outline"),
            Self::StoryInfo => f.write_str("story-info"),
            Self::ChapterCount => f.write_str("chapter-count"),
            Self::ChapterOutline(n) => write!(f, "chapter-outline-{n:03}"),
            Self::Chapter(n) => write!(f, "chapter-{n:03}"),
            Self::Pass(kind) => write!(f, "pass-{kind}"),
        }
    }
}

/// Storage collaborator for checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// # Errors
    ///
    /// I/O or encoding failures.
    fn save_checkpoint(
        &self,
        namespace: &RunNamespace,
        key: &str,
        payload: &Value,
    ) -> Result<(), CheckpointError>;

    /// # Errors
    ///
    /// I/O failures, or `Corrupt` when the stored checkpoint does not decode.
    fn load_checkpoint(
        &self,
        namespace: &RunNamespace,
        key: &str,
    ) -> Result<Option<Value>, CheckpointError>;

    /// # Errors
    ///
    /// I/O failures.
    fn delete_checkpoint(&self, namespace: &RunNamespace, key: &str)
    -> Result<(), CheckpointError>;

    /// # Errors
    ///
    /// I/O failures.
    fn clear_checkpoints(&self, namespace: &RunNamespace) -> Result<(), CheckpointError>;

    /// Stored keys, sorted.
    ///
    /// # Errors
    ///
    /// I/O failures.
    fn list_checkpoints(&self, namespace: &RunNamespace) -> Result<Vec<String>, CheckpointError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEnvelope {
    schema_version: u32,
    key: String,
    saved_at: DateTime<Utc>,
    content_hash: String,
    payload: Value,
}

/// BLAKE3 hex digest of the JCS-canonical form of `payload`.
///
/// # Errors
///
/// Returns the canonicalization error text.
pub fn content_hash(payload: &Value) -> Result<String, String> {
    let canonical = serde_json_canonicalizer::to_vec(payload).map_err(|e| e.to_string())?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

/// Checkpoints as `<root>/<namespace>/<key>.json`, written atomically.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: Utf8PathBuf,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[must_use]
    pub fn namespace_dir(&self, namespace: &RunNamespace) -> Utf8PathBuf {
        self.root.join(namespace.as_str())
    }

    #[must_use]
    pub fn path(&self, namespace: &RunNamespace, key: &str) -> Utf8PathBuf {
        self.namespace_dir(namespace).join(format!("{key}.json"))
    }
}

fn io_error(key: &str, path: &Utf8Path, e: impl fmt::Display) -> CheckpointError {
    CheckpointError::Io {
        key: key.to_string(),
        path: path.to_string(),
        reason: e.to_string(),
    }
}

fn corrupt(key: &str, reason: impl Into<String>) -> CheckpointError {
    CheckpointError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save_checkpoint(
        &self,
        namespace: &RunNamespace,
        key: &str,
        payload: &Value,
    ) -> Result<(), CheckpointError> {
        let path = self.path(namespace, key);
        let envelope = CheckpointEnvelope {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            key: key.to_string(),
            saved_at: Utc::now(),
            content_hash: content_hash(payload).map_err(|reason| CheckpointError::Encode {
                key: key.to_string(),
                reason,
            })?,
            payload: payload.clone(),
        };
        let json =
            serde_json::to_string_pretty(&envelope).map_err(|e| CheckpointError::Encode {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let dir = self.namespace_dir(namespace);
        std::fs::create_dir_all(&dir).map_err(|e| io_error(key, &dir, e))?;
        write_file_atomic(&path, &json).map_err(|e| io_error(key, &path, format!("{e:#}")))?;
        debug!(namespace = %namespace, key, "Checkpoint saved");
        Ok(())
    }

    fn load_checkpoint(
        &self,
        namespace: &RunNamespace,
        key: &str,
    ) -> Result<Option<Value>, CheckpointError> {
        let path = self.path(namespace, key);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(key, &path, e)),
        };

        let envelope: CheckpointEnvelope =
            serde_json::from_str(&text).map_err(|e| corrupt(key, e.to_string()))?;
        if envelope.schema_version != CHECKPOINT_SCHEMA_VERSION {
            return Err(corrupt(
                key,
                format!("unsupported schema version {}", envelope.schema_version),
            ));
        }
        if envelope.key != key {
            return Err(corrupt(key, format!("envelope is for '{}'", envelope.key)));
        }
        let actual = content_hash(&envelope.payload).map_err(|reason| corrupt(key, reason))?;
        if actual != envelope.content_hash {
            return Err(corrupt(key, "content hash mismatch"));
        }
        Ok(Some(envelope.payload))
    }

    fn delete_checkpoint(
        &self,
        namespace: &RunNamespace,
        key: &str,
    ) -> Result<(), CheckpointError> {
        let path = self.path(namespace, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, &path, e)),
        }
    }

    fn clear_checkpoints(&self, namespace: &RunNamespace) -> Result<(), CheckpointError> {
        let dir = self.namespace_dir(namespace);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("*", &dir, e)),
        }
    }

    fn list_checkpoints(&self, namespace: &RunNamespace) -> Result<Vec<String>, CheckpointError> {
        let dir = self.namespace_dir(namespace);
        let entries = match dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("*", &dir, e)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("*", &dir, e))?;
            if let Some(key) = entry.file_name().strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    entries: Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<String, BTreeMap<String, Value>>) -> R) -> R {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save_checkpoint(
        &self,
        namespace: &RunNamespace,
        key: &str,
        payload: &Value,
    ) -> Result<(), CheckpointError> {
        self.with(|entries| {
            entries
                .entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), payload.clone());
        });
        Ok(())
    }

    fn load_checkpoint(
        &self,
        namespace: &RunNamespace,
        key: &str,
    ) -> Result<Option<Value>, CheckpointError> {
        Ok(self.with(|entries| {
            entries
                .get(namespace.as_str())
                .and_then(|ns| ns.get(key))
                .cloned()
        }))
    }

    fn delete_checkpoint(
        &self,
        namespace: &RunNamespace,
        key: &str,
    ) -> Result<(), CheckpointError> {
        self.with(|entries| {
            if let Some(ns) = entries.get_mut(namespace.as_str()) {
                ns.remove(key);
            }
        });
        Ok(())
    }

    fn clear_checkpoints(&self, namespace: &RunNamespace) -> Result<(), CheckpointError> {
        self.with(|entries| entries.remove(namespace.as_str()));
        Ok(())
    }

    fn list_checkpoints(&self, namespace: &RunNamespace) -> Result<Vec<String>, CheckpointError> {
        Ok(self.with(|entries| {
            entries
                .get(namespace.as_str())
                .map(|ns| ns.keys().cloned().collect())
                .unwrap_or_default()
        }))
    }
}

/// Typed access to one namespace of a store.
///
/// A checkpoint that fails to decode is deleted and reported as absent, so
/// the milestone is regenerated instead of carrying corruption forward.
#[derive(Clone)]
pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    namespace: RunNamespace,
}

impl Checkpointer {
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>, namespace: RunNamespace) -> Self {
        Self { store, namespace }
    }

    #[must_use]
    pub fn namespace(&self) -> &RunNamespace {
        &self.namespace
    }

    fn discard(&self, key: &str, reason: &str) -> Result<(), StoryloomError> {
        warn!(
            namespace = %self.namespace,
            key,
            reason,
            "Discarding corrupt checkpoint, milestone will be regenerated"
        );
        self.store.delete_checkpoint(&self.namespace, key)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Store I/O failures. Corrupt checkpoints are discarded, not returned.
    pub fn load<T: DeserializeOwned>(
        &self,
        key: CheckpointKey,
    ) -> Result<Option<T>, StoryloomError> {
        let key = key.to_string();
        let value = match self.store.load_checkpoint(&self.namespace, &key) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(CheckpointError::Corrupt { reason, .. }) => {
                self.discard(&key, &reason)?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_value(value) {
            Ok(payload) => {
                debug!(namespace = %self.namespace, key, "Resuming from checkpoint");
                Ok(Some(payload))
            }
            Err(e) => {
                self.discard(&key, &e.to_string())?;
                Ok(None)
            }
        }
    }

    /// # Errors
    ///
    /// Encoding or store I/O failures; both end the run.
    pub fn save<T: Serialize>(&self, key: CheckpointKey, payload: &T) -> Result<(), StoryloomError> {
        let key = key.to_string();
        let value = serde_json::to_value(payload).map_err(|e| CheckpointError::Encode {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.store.save_checkpoint(&self.namespace, &key, &value)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Store I/O failures.
    pub fn clear(&self) -> Result<(), StoryloomError> {
        self.store.clear_checkpoints(&self.namespace)?;
        Ok(())
    }

    /// Known milestone keys present in the store, in run order.
    ///
    /// # Errors
    ///
    /// Store I/O failures.
    pub fn milestones(&self) -> Result<Vec<CheckpointKey>, StoryloomError> {
        let mut keys: Vec<CheckpointKey> = self
            .store
            .list_checkpoints(&self.namespace)?
            .iter()
            .filter_map(|k| CheckpointKey::parse(k))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryInfoCheckpoint {
    pub info: StoryInfo,
    #[serde(default)]
    pub degraded: Option<Degradation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterCountCheckpoint {
    pub count: usize,
    #[serde(default)]
    pub degraded: Option<Degradation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterCheckpoint {
    pub text: String,
    #[serde(default)]
    pub degraded: Vec<Degradation>,
}

/// Chapters already rewritten by a post-pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassProgress {
    pub chapters: Vec<String>,
}

/// Aggregated view of a namespace's milestones.
///
/// Read-only: corrupt entries are listed in `corrupt` and left on disk for the
/// next run to discard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCheckpoint {
    pub namespace: RunNamespace,
    pub translated_prompt: bool,
    pub outline: bool,
    pub story_info: bool,
    pub chapter_count: Option<usize>,
    pub chapter_outlines: Vec<usize>,
    pub chapters: Vec<usize>,
    pub passes: BTreeMap<PassKind, usize>,
    pub corrupt: Vec<CheckpointKey>,
}

impl RunCheckpoint {
    /// Collect every milestone stored for `namespace` without modifying it.
    ///
    /// # Errors
    ///
    /// Store I/O failures.
    pub fn restore(
        store: Arc<dyn CheckpointStore>,
        namespace: RunNamespace,
    ) -> Result<Self, StoryloomError> {
        let checkpointer = Checkpointer::new(Arc::clone(&store), namespace.clone());
        let mut view = Self {
            namespace,
            translated_prompt: false,
            outline: false,
            story_info: false,
            chapter_count: None,
            chapter_outlines: Vec::new(),
            chapters: Vec::new(),
            passes: BTreeMap::new(),
            corrupt: Vec::new(),
        };
        for key in checkpointer.milestones()? {
            let value = match store.load_checkpoint(&view.namespace, &key.to_string()) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(CheckpointError::Corrupt { .. }) => {
                    view.corrupt.push(key);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match key {
                CheckpointKey::TranslatedPrompt => view.translated_prompt = true,
                CheckpointKey::Outline => view.outline = true,
                CheckpointKey::StoryInfo => view.story_info = true,
                CheckpointKey::ChapterCount => {
                    match serde_json::from_value::<ChapterCountCheckpoint>(value) {
                        Ok(count) => view.chapter_count = Some(count.count),
                        Err(_) => view.corrupt.push(key),
                    }
                }
                CheckpointKey::ChapterOutline(n) => view.chapter_outlines.push(n),
                CheckpointKey::Chapter(n) => view.chapters.push(n),
                CheckpointKey::Pass(kind) => match serde_json::from_value::<PassProgress>(value) {
                    Ok(progress) => {
                        view.passes.insert(kind, progress.chapters.len());
                    }
                    Err(_) => view.corrupt.push(key),
                },
            }
        }
        Ok(view)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.translated_prompt
            && !self.outline
            && !self.story_info
            && self.chapter_count.is_none()
            && self.chapter_outlines.is_empty()
            && self.chapters.is_empty()
            && self.passes.is_empty()
            && self.corrupt.is_empty()
    }

    /// One line per milestone group, for status output.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let total = self
            .chapter_count
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        let mut lines = Vec::new();
        if self.translated_prompt {
            lines.push("translated prompt".to_string());
        }
        if self.outline {
            lines.push("outline".to_string());
        }
        if self.story_info {
            lines.push("story info".to_string());
        }
        if let Some(n) = self.chapter_count {
            lines.push(format!("chapter count: {n}"));
        }
        if !self.chapter_outlines.is_empty() {
            lines.push(format!(
                "chapter outlines: {}/{total}",
                self.chapter_outlines.len()
            ));
        }
        if !self.chapters.is_empty() {
            lines.push(format!("chapters: {}/{total}", self.chapters.len()));
        }
        for (kind, done) in &self.passes {
            lines.push(format!("{kind} pass: {done}/{total}"));
        }
        for key in &self.corrupt {
            lines.push(format!("{key}: corrupt"));
        }
        lines
    }
}
