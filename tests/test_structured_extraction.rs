//! Structured payload extraction against a scripted backend
//!
//! Covers fenced replies, repair of truncated or incomplete objects, and the
//! sentinel fallback once the attempt budget is spent.

use anyhow::Result;
use storyloom_engine::extract::ChapterCountPayload;
use storyloom_engine::test_support::ScriptedBackend;
use storyloom_engine::{
    BackendTarget, CancelFlag, ConversationSession, GenerationOptions, Purpose,
    StructuredResponseExtractor,
};

fn target() -> BackendTarget {
    BackendTarget::new("checker")
}

async fn first_reply(
    backend: &ScriptedBackend,
    session: &mut ConversationSession,
) -> Result<storyloom_engine::Generator> {
    let generator = backend.generator(CancelFlag::new(), 40);
    generator
        .generate(
            session,
            &target(),
            &GenerationOptions::new(Purpose::ChapterCount).structured(),
        )
        .await?;
    Ok(generator)
}

#[tokio::test]
async fn test_fenced_reply_decodes_first_time() -> Result<()> {
    let backend = ScriptedBackend::new();
    backend.push(Purpose::ChapterCount, "```json\n{\"TotalChapters\": 7}\n```");
    let mut session = ConversationSession::with_user("How many chapters?");
    let generator = first_reply(&backend, &mut session).await?;

    let extracted = StructuredResponseExtractor::new(3)
        .extract::<ChapterCountPayload>(&generator, &mut session, &target(), Purpose::ChapterCount)
        .await?;

    assert!(extracted.ok);
    assert_eq!(extracted.value.total_chapters, 7);
    assert_eq!(extracted.attempts, 1);
    assert_eq!(session.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_truncated_reply_is_repaired() -> Result<()> {
    let backend = ScriptedBackend::new();
    backend.push(Purpose::ChapterCount, "{\"TotalChapters\": 7");
    backend.push(Purpose::ChapterCount, "{\"TotalChapters\": 7}");
    let mut session = ConversationSession::with_user("How many chapters?");
    let generator = first_reply(&backend, &mut session).await?;

    let extracted = StructuredResponseExtractor::new(3)
        .extract::<ChapterCountPayload>(&generator, &mut session, &target(), Purpose::ChapterCount)
        .await?;

    assert!(extracted.ok);
    assert_eq!(extracted.value.total_chapters, 7);
    assert_eq!(extracted.attempts, 2);
    // user, reply, repair request, repaired reply
    assert_eq!(session.len(), 4);

    let calls = backend.calls_for(Purpose::ChapterCount);
    assert_eq!(calls.len(), 2);
    let repair = calls[1].messages.last().map(|m| m.content.clone()).unwrap_or_default();
    assert!(repair.contains("could not be parsed"));
    assert!(repair.contains("TotalChapters"));
    assert!(calls.iter().all(|c| c.structured));
    assert_eq!(calls[0].seed, Some(40));
    assert_eq!(calls[1].seed, Some(41));
    Ok(())
}

#[tokio::test]
async fn test_persistent_garbage_yields_sentinel() -> Result<()> {
    let backend = ScriptedBackend::new();
    for _ in 0..3 {
        backend.push(Purpose::ChapterCount, "I think about seven chapters would suit it.");
    }
    let mut session = ConversationSession::with_user("How many chapters?");
    let generator = first_reply(&backend, &mut session).await?;

    let extracted = StructuredResponseExtractor::new(3)
        .extract::<ChapterCountPayload>(&generator, &mut session, &target(), Purpose::ChapterCount)
        .await?;

    assert!(!extracted.ok);
    assert_eq!(extracted.value.total_chapters, -1);
    assert_eq!(extracted.attempts, 3);
    assert_eq!(backend.calls_for(Purpose::ChapterCount).len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_missing_field_triggers_repair() -> Result<()> {
    let backend = ScriptedBackend::new();
    backend.push(Purpose::ChapterCount, "{\"Chapters\": 4}");
    backend.push(Purpose::ChapterCount, "{\"TotalChapters\": 4}");
    let mut session = ConversationSession::with_user("How many chapters?");
    let generator = first_reply(&backend, &mut session).await?;

    let extracted = StructuredResponseExtractor::new(3)
        .extract::<ChapterCountPayload>(&generator, &mut session, &target(), Purpose::ChapterCount)
        .await?;

    assert!(extracted.ok);
    assert_eq!(extracted.value.total_chapters, 4);
    assert_eq!(extracted.attempts, 2);
    Ok(())
}

#[tokio::test]
async fn test_blank_assistant_message_is_repaired() -> Result<()> {
    let backend = ScriptedBackend::new();
    backend.push(Purpose::ChapterCount, "{\"TotalChapters\": 2}");
    let generator = backend.generator(CancelFlag::new(), 1);
    let mut session = ConversationSession::with_user("How many chapters?");
    session.push_assistant("   \n");

    let extracted = StructuredResponseExtractor::new(2)
        .extract::<ChapterCountPayload>(&generator, &mut session, &target(), Purpose::ChapterCount)
        .await?;

    assert!(extracted.ok);
    assert_eq!(extracted.value.total_chapters, 2);
    assert_eq!(extracted.attempts, 2);
    assert_eq!(backend.calls().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_single_attempt_budget_never_calls_backend() -> Result<()> {
    let backend = ScriptedBackend::new();
    let generator = backend.generator(CancelFlag::new(), 1);
    let mut session = ConversationSession::with_user("How many chapters?");
    session.push_assistant("twelve");

    let extracted = StructuredResponseExtractor::new(0)
        .extract::<ChapterCountPayload>(&generator, &mut session, &target(), Purpose::ChapterCount)
        .await?;

    assert!(!extracted.ok);
    assert_eq!(extracted.attempts, 1);
    assert!(backend.calls().is_empty());
    Ok(())
}
