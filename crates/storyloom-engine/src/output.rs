//! Final artifact: the assembled story plus its metadata record.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storyloom_utils::StoryloomError;
use storyloom_utils::atomic_write::write_file_atomic;
use storyloom_utils::run_title::filename_title;
use tracing::{info, warn};

use crate::settings::SettingsSummary;

/// Join chapters under `### Chapter i` headings, separated by three newlines.
#[must_use]
pub fn assemble_manuscript(chapters: &[String]) -> String {
    chapters
        .iter()
        .enumerate()
        .map(|(i, text)| format!("### Chapter {}\n\n{text}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n\n")
}

/// A step that finished below its quality bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<usize>,
    pub detail: String,
}

impl Degradation {
    #[must_use]
    pub fn new(phase: impl Into<String>, chapter: Option<usize>, detail: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            chapter,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryMetadata {
    pub title: String,
    pub summary: String,
    pub tags: String,
    pub score: f64,
    pub base_prompt: String,
    pub outline: String,
    pub story_elements: String,
    pub rough_outline: String,
    pub base_context: String,
    pub chapter_count: usize,
    pub word_count: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub seed: u64,
    pub settings: SettingsSummary,
    #[serde(default)]
    pub degraded: Vec<Degradation>,
}

impl StoryMetadata {
    /// Words per minute over the whole run, 0 when no time elapsed.
    #[must_use]
    pub fn words_per_minute(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.word_count as f64 / (self.elapsed_secs / 60.0)
        } else {
            0.0
        }
    }
}

/// Where a story ended up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedStory {
    pub markdown: Option<Utf8PathBuf>,
    pub metadata: Option<Utf8PathBuf>,
}

/// Receives the finished story.
pub trait ArtifactSink: Send + Sync {
    /// # Errors
    ///
    /// `OutputWriteFailed` when the story cannot be persisted.
    fn save_final(
        &self,
        title: &str,
        body: &str,
        metadata: &StoryMetadata,
    ) -> Result<SavedStory, StoryloomError>;
}

/// Writes `Story_<Title>_<n>_Score_<score>.md` plus a sibling `.json`.
pub struct StoryWriter {
    dir: Utf8PathBuf,
    name: Option<String>,
}

impl StoryWriter {
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            name: None,
        }
    }

    /// Use a fixed file name (without extension) instead of the numbered one.
    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|n| !n.trim().is_empty());
        self
    }

    /// Path of the markdown file for `title`.
    #[must_use]
    pub fn markdown_path(&self, title: &str, score: f64) -> Utf8PathBuf {
        if let Some(name) = &self.name {
            let stem = name.strip_suffix(".md").unwrap_or(name);
            return self.dir.join(format!("{stem}.md"));
        }
        let base = format!("Story_{}", filename_title(title));
        let existing = existing_names(&self.dir);
        let n = (1..)
            .find(|n| {
                let prefix = format!("{base}_{n}_Score_");
                !existing.iter().any(|name| name.starts_with(&prefix))
            })
            .unwrap_or(1);
        self.dir
            .join(format!("{base}_{n}_Score_{}.md", score.round() as i64))
    }
}

fn existing_names(dir: &Utf8Path) -> Vec<String> {
    match dir.read_dir_utf8() {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn write_failed(path: &Utf8Path, reason: impl ToString) -> StoryloomError {
    StoryloomError::OutputWriteFailed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Markdown rendering of the final artifact.
#[must_use]
pub fn render_markdown(title: &str, body: &str, metadata: &StoryMetadata) -> String {
    let settings = &metadata.settings;
    let mut out = String::new();

    out.push_str("# Work Statistics\n\n");
    out.push_str(&format!("- Total Words: {}\n", metadata.word_count));
    out.push_str(&format!("- Title: {title}\n"));
    out.push_str(&format!("- Summary: {}\n", metadata.summary));
    out.push_str(&format!("- Tags: {}\n", metadata.tags));
    out.push_str(&format!("- Score: {:.0}\n", metadata.score));
    out.push_str(&format!(
        "- Generation Start Date: {}\n",
        metadata.started_at.format("%Y/%m/%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "- Generation Total Time: {:.1}s\n",
        metadata.elapsed_secs
    ));
    out.push_str(&format!(
        "- Generation Average WPM: {:.1}\n",
        metadata.words_per_minute()
    ));

    out.push_str("\n# User Settings\n\n");
    out.push_str(&format!("- Base Prompt: {}\n", metadata.base_prompt));

    out.push_str("\n# Generation Settings\n\n");
    for (role, model) in &settings.models {
        out.push_str(&format!("- {role} model: {model}\n"));
    }
    out.push_str(&format!("- Seed: {}\n", settings.seed));
    out.push_str(&format!(
        "- Quality threshold: {}\n",
        settings.quality_threshold
    ));
    out.push_str(&format!(
        "- Outline revisions: {}..={}\n",
        settings.outline_revisions.0, settings.outline_revisions.1
    ));
    out.push_str(&format!(
        "- Chapter revisions: {}..={} (enabled: {})\n",
        settings.chapter_revisions.0, settings.chapter_revisions.1, settings.chapter_revision_enabled
    ));
    out.push_str(&format!("- Expand outline: {}\n", settings.expand_outline));
    out.push_str(&format!("- Scene pipeline: {}\n", settings.scene_pipeline));
    out.push_str(&format!("- Edit pass: {}\n", settings.edit_pass));
    out.push_str(&format!("- Scrub pass: {}\n", settings.scrub_pass));
    if let Some(language) = &settings.translate {
        out.push_str(&format!("- Translate to: {language}\n"));
    }
    if let Some(language) = &settings.translate_prompt {
        out.push_str(&format!("- Prompt translated to: {language}\n"));
    }

    if !metadata.degraded.is_empty() {
        out.push_str("\n# Degraded Steps\n\n");
        for d in &metadata.degraded {
            match d.chapter {
                Some(chapter) => {
                    out.push_str(&format!("- {} (chapter {chapter}): {}\n", d.phase, d.detail));
                }
                None => out.push_str(&format!("- {}: {}\n", d.phase, d.detail)),
            }
        }
    }

    out.push_str(&format!("\n---\n\n# {title}\n\n{body}\n\n---\n\n"));
    out.push_str(&format!("# Outline\n\n```\n{}\n```\n", metadata.outline));
    out
}

impl ArtifactSink for StoryWriter {
    fn save_final(
        &self,
        title: &str,
        body: &str,
        metadata: &StoryMetadata,
    ) -> Result<SavedStory, StoryloomError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| write_failed(&self.dir, e))?;

        let markdown = self.markdown_path(title, metadata.score);
        let json_path = markdown.with_extension("json");

        let result = write_file_atomic(&markdown, &render_markdown(title, body, metadata))
            .map_err(|e| write_failed(&markdown, format!("{e:#}")))?;
        for warning in result.warnings {
            warn!(path = %markdown, "{warning}");
        }

        let json = serde_json::to_string_pretty(metadata).map_err(|e| write_failed(&json_path, e))?;
        write_file_atomic(&json_path, &json)
            .map_err(|e| write_failed(&json_path, format!("{e:#}")))?;

        info!(path = %markdown, "Story saved");
        Ok(SavedStory {
            markdown: Some(markdown),
            metadata: Some(json_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RunSettings;
    use tempfile::TempDir;

    fn metadata() -> StoryMetadata {
        StoryMetadata {
            title: "The Salt Road".into(),
            summary: "A caravan crosses a dry sea.".into(),
            tags: "desert, journey".into(),
            score: 87.6,
            base_prompt: "Write about a caravan.".into(),
            outline: "# Chapter 1\nThey leave.".into(),
            story_elements: String::new(),
            rough_outline: String::new(),
            base_context: String::new(),
            chapter_count: 2,
            word_count: 600,
            started_at: Utc::now(),
            elapsed_secs: 120.0,
            seed: 12,
            settings: RunSettings::default().summary(),
            degraded: vec![Degradation::new("chapters", Some(2), "stage dialogue force-accepted")],
        }
    }

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn manuscript_uses_chapter_headings() {
        let body = assemble_manuscript(&["one".into(), "two".into()]);
        assert_eq!(body, "### Chapter 1\n\none\n\n\n### Chapter 2\n\ntwo");
    }

    #[test]
    fn markdown_has_stats_story_and_outline() {
        let text = render_markdown("The Salt Road", "### Chapter 1\n\nText", &metadata());
        assert!(text.starts_with("# Work Statistics"));
        assert!(text.contains("- Total Words: 600"));
        assert!(text.contains("- Generation Average WPM: 300.0"));
        assert!(text.contains("# The Salt Road\n\n### Chapter 1"));
        assert!(text.contains("# Degraded Steps"));
        assert!(text.contains("- chapters (chapter 2): stage dialogue force-accepted\n"));
        assert!(text.contains("# User Settings\n\n- Base Prompt: Write about a caravan.\n"));
        assert!(text.contains(&format!("- Seed: {}\n", RunSettings::default().seed)));
        assert!(text.contains("- Score: 88\n"));
        assert!(text.contains("```\n# Chapter 1\nThey leave.\n```"));
    }

    #[test]
    fn numbered_files_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let writer = StoryWriter::new(utf8(&dir));
        let meta = metadata();

        let first = writer.save_final("The Salt Road", "body", &meta).unwrap();
        let second = writer.save_final("The Salt Road", "body", &meta).unwrap();

        let first_md = first.markdown.unwrap();
        assert_eq!(first_md.file_name(), Some("Story_The_Salt_Road_1_Score_88.md"));
        assert_eq!(
            second.markdown.unwrap().file_name(),
            Some("Story_The_Salt_Road_2_Score_88.md")
        );
        let json = std::fs::read_to_string(first.metadata.unwrap()).unwrap();
        let parsed: StoryMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.degraded.len(), 1);
        assert!(first_md.exists());
    }

    #[test]
    fn explicit_name_wins() {
        let dir = TempDir::new().unwrap();
        let writer = StoryWriter::new(utf8(&dir)).with_name(Some("final.md".into()));
        let saved = writer.save_final("Title", "body", &metadata()).unwrap();
        assert_eq!(saved.markdown.unwrap().file_name(), Some("final.md"));
        assert_eq!(saved.metadata.unwrap().file_name(), Some("final.json"));
    }
}
