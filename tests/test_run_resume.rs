//! End-to-end runs over the file-backed checkpoint store
//!
//! A run that dies mid-way must leave its completed milestones on disk, and a
//! rerun under the same title must pick them up and finish with the same
//! manuscript an uninterrupted run produces.

use anyhow::Result;
use camino::Utf8PathBuf;
use std::sync::Arc;
use storyloom_engine::test_support::{MemoryArtifactSink, ScriptedBackend};
use storyloom_engine::{
    ArtifactSink, CancelFlag, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    Purpose, RunCheckpoint, RunNamespace, RunOrchestrator, RunReport, RunRequest, RunSettings,
    StoryWriter,
};
use tempfile::TempDir;

const TITLE: &str = "harbor";

fn request() -> RunRequest {
    RunRequest::new(TITLE, "A lighthouse keeper finds a map in a bottle.")
}

fn utf8(dir: &TempDir) -> Result<Utf8PathBuf> {
    Ok(Utf8PathBuf::try_from(dir.path().to_path_buf())?)
}

async fn run_with(
    backend: &ScriptedBackend,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn ArtifactSink>,
) -> Result<RunReport, storyloom_utils::StoryloomError> {
    let settings = RunSettings::default();
    let generator = backend.generator(CancelFlag::new(), settings.seed);
    RunOrchestrator::new(settings, generator, store, sink)
        .run(&request())
        .await
}

async fn reference_run() -> Result<RunReport> {
    Ok(run_with(
        &ScriptedBackend::new(),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(MemoryArtifactSink::new()),
    )
    .await?)
}

#[tokio::test]
async fn test_interrupted_run_leaves_milestones_on_disk() -> Result<()> {
    let temp = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(utf8(&temp)?.join("checkpoints")));
    let sink = Arc::new(MemoryArtifactSink::new());
    let backend = ScriptedBackend::new();
    backend.fail_after(30);

    let err = run_with(&backend, store.clone(), sink.clone()).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(sink.saved().is_empty());

    let ns = RunNamespace::from_title(TITLE)?;
    assert!(store.path(&ns, "outline").exists());
    assert!(store.path(&ns, "chapter-count").exists());
    assert!(store.path(&ns, "chapter-outline-003").exists());
    assert!(store.path(&ns, "chapter-001").exists());
    assert!(!store.path(&ns, "chapter-002").exists());

    let view = RunCheckpoint::restore(store, ns)?;
    let lines = view.describe();
    assert!(lines.contains(&"outline".to_string()));
    assert!(lines.contains(&"chapter count: 3".to_string()));
    assert!(lines.contains(&"chapter outlines: 3/3".to_string()));
    assert!(lines.contains(&"chapters: 1/3".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_resumed_run_matches_uninterrupted_run() -> Result<()> {
    let expected = reference_run().await?;

    let temp = TempDir::new()?;
    let root = utf8(&temp)?;
    let store = Arc::new(FileCheckpointStore::new(root.join("checkpoints")));
    let stories = root.join("Stories");
    let sink = Arc::new(StoryWriter::new(stories.clone()));

    let flaky = ScriptedBackend::new();
    flaky.fail_after(30);
    assert!(run_with(&flaky, store.clone(), sink.clone()).await.is_err());
    assert!(!stories.exists());

    let backend = ScriptedBackend::new();
    let report = run_with(&backend, store.clone(), sink).await?;

    assert!(report.resumed_milestones > 0);
    assert_eq!(report.chapters, expected.chapters);
    assert_eq!(report.body, expected.body);
    assert!(backend.calls_for(Purpose::InitialOutline).is_empty());
    assert!(backend.calls_for(Purpose::ChapterCount).is_empty());

    let markdown = report.saved.markdown.clone().expect("markdown path");
    let name = markdown.file_name().unwrap_or_default();
    assert!(name.starts_with("Story_The_Lantern_Harbor_1_Score_"), "{name}");
    assert!(name.ends_with(".md"));
    let text = std::fs::read_to_string(&markdown)?;
    assert!(text.starts_with("# Work Statistics"));
    assert!(text.contains(&report.body));
    assert!(report.saved.metadata.expect("metadata path").exists());

    let ns = RunNamespace::from_title(TITLE)?;
    assert!(!store.namespace_dir(&ns).exists());
    Ok(())
}

#[tokio::test]
async fn test_tampered_chapter_checkpoint_is_regenerated() -> Result<()> {
    let expected = reference_run().await?;

    let temp = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(utf8(&temp)?));
    let sink = Arc::new(MemoryArtifactSink::new());
    let flaky = ScriptedBackend::new();
    flaky.fail_after(30);
    assert!(run_with(&flaky, store.clone(), sink.clone()).await.is_err());

    let ns = RunNamespace::from_title(TITLE)?;
    let path = store.path(&ns, "chapter-001");
    let mut envelope: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    envelope["payload"]["text"] = serde_json::json!("tampered");
    std::fs::write(&path, serde_json::to_string(&envelope)?)?;

    let backend = ScriptedBackend::new();
    let report = run_with(&backend, store, sink.clone()).await?;

    assert!(!report.body.contains("tampered"));
    assert_eq!(report.body, expected.body);
    assert!(!backend.calls_for(Purpose::StageCharacter).is_empty());
    assert_eq!(sink.saved().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_separate_titles_do_not_share_checkpoints() -> Result<()> {
    let temp = TempDir::new()?;
    let store = FileCheckpointStore::new(utf8(&temp)?);
    let first = RunNamespace::numbered(TITLE, 1)?;
    let second = RunNamespace::numbered(TITLE, 2)?;
    assert_ne!(first, second);

    store.save_checkpoint(&first, "outline", &serde_json::json!({"outline": "x"}))?;
    assert_eq!(store.list_checkpoints(&first)?, vec!["outline".to_string()]);
    assert!(store.list_checkpoints(&second)?.is_empty());
    Ok(())
}
