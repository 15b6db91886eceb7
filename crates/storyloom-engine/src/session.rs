//! Conversations and the generation port.
//!
//! A [`ConversationSession`] is an append-only message history. The engine
//! talks to the model exclusively through [`GenerationPort`], which appends
//! one assistant reply per call. [`Generator`] is the handle components hold:
//! it threads the run seed, checks cancellation at every call boundary, and
//! converts port failures into [`StoryloomError`].

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use storyloom_llm::{LlmBackend, LlmInvocation, Message, Role};
use storyloom_utils::stats::word_count;
use storyloom_utils::{LlmError, StoryloomError};
use tracing::{debug, warn};

use crate::purpose::Purpose;

/// Extra attempts when a reply is blank or shorter than the length hint.
pub const MAX_LENGTH_RETRIES: u32 = 3;

/// Append-only message history for one line of conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationSession {
    messages: Vec<Message>,
}

impl ConversationSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session opened with a system message.
    #[must_use]
    pub fn with_system(content: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.push_system(content);
        session
    }

    /// Session holding a single user message.
    #[must_use]
    pub fn with_user(content: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.push_user(content);
        session
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.messages.push(Message::system(content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Content of the most recent assistant message.
    #[must_use]
    pub fn last_assistant(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Number of user messages in the history.
    #[must_use]
    pub fn user_turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }
}

/// Which model a call goes to. An empty model selects the provider default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendTarget {
    pub model: String,
}

impl BackendTarget {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

/// Per-call options handed to the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOptions {
    pub purpose: Purpose,
    pub seed: Option<u64>,
    /// Minimum acceptable number of words in the reply.
    pub min_words: Option<usize>,
    /// The caller will decode the reply as JSON.
    pub structured: bool,
}

impl GenerationOptions {
    #[must_use]
    pub fn new(purpose: Purpose) -> Self {
        Self {
            purpose,
            seed: None,
            min_words: None,
            structured: purpose.is_structured(),
        }
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn min_words(mut self, words: usize) -> Self {
        self.min_words = Some(words);
        self
    }

    #[must_use]
    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }
}

/// The single seam between the engine and a text-generation backend.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Send `session` to the model and append exactly one assistant reply.
    ///
    /// # Errors
    ///
    /// Fails only once the backend has exhausted its own transport retries.
    async fn generate(
        &self,
        session: &mut ConversationSession,
        target: &BackendTarget,
        options: &GenerationOptions,
    ) -> Result<(), LlmError>;
}

/// [`GenerationPort`] over any [`LlmBackend`].
pub struct LlmGenerationPort {
    backend: Box<dyn LlmBackend>,
    run_id: String,
    timeout: Duration,
}

impl LlmGenerationPort {
    #[must_use]
    pub fn new(backend: Box<dyn LlmBackend>, run_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            run_id: run_id.into(),
            timeout,
        }
    }

    fn invocation(
        &self,
        session: &ConversationSession,
        target: &BackendTarget,
        options: &GenerationOptions,
        retry: u32,
    ) -> LlmInvocation {
        let mut inv = LlmInvocation::new(
            self.run_id.clone(),
            options.purpose.as_ref(),
            target.model.clone(),
            self.timeout,
            session.messages().to_vec(),
        );
        if let Some(seed) = options.seed {
            inv = inv.with_metadata("seed", json!(seed.wrapping_add(u64::from(retry))));
        }
        if options.structured {
            inv = inv.with_metadata("response_format", json!({"type": "json_object"}));
        }
        if let Some(words) = options.min_words {
            inv = inv.with_metadata("min_words", json!(words));
        }
        inv
    }
}

fn too_short(text: &str, min_words: Option<usize>) -> bool {
    text.trim().is_empty() || min_words.is_some_and(|min| word_count(text) < min)
}

#[async_trait]
impl GenerationPort for LlmGenerationPort {
    async fn generate(
        &self,
        session: &mut ConversationSession,
        target: &BackendTarget,
        options: &GenerationOptions,
    ) -> Result<(), LlmError> {
        let mut reply = String::new();
        for retry in 0..=MAX_LENGTH_RETRIES {
            let inv = self.invocation(session, target, options, retry);
            let result = self.backend.invoke(inv).await?;
            reply = result.raw_response;
            if !too_short(&reply, options.min_words) {
                break;
            }
            if retry < MAX_LENGTH_RETRIES {
                debug!(
                    purpose = %options.purpose,
                    words = word_count(&reply),
                    min_words = options.min_words,
                    retry = retry + 1,
                    "Reply too short, regenerating"
                );
            } else {
                warn!(
                    purpose = %options.purpose,
                    words = word_count(&reply),
                    min_words = options.min_words,
                    "Reply still short after {MAX_LENGTH_RETRIES} regenerations, keeping it"
                );
            }
        }
        session.push_assistant(reply);
        Ok(())
    }
}

/// Shared cancellation flag, checked between generation calls.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cloneable handle to the generation port for one run.
#[derive(Clone)]
pub struct Generator {
    port: Arc<dyn GenerationPort>,
    cancel: CancelFlag,
    seed: u64,
}

impl Generator {
    #[must_use]
    pub fn new(port: Arc<dyn GenerationPort>, cancel: CancelFlag, seed: u64) -> Self {
        Self { port, cancel, seed }
    }

    /// Run-wide deterministic seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Append one reply to `session`.
    ///
    /// Calls without an explicit seed use the run seed.
    ///
    /// # Errors
    ///
    /// `Cancelled` when the run was interrupted before this call, or the
    /// port's transport failure.
    pub async fn generate(
        &self,
        session: &mut ConversationSession,
        target: &BackendTarget,
        options: &GenerationOptions,
    ) -> Result<(), StoryloomError> {
        if self.cancel.is_cancelled() {
            return Err(StoryloomError::Cancelled {
                phase: "generation".to_string(),
            });
        }
        let options = if options.seed.is_none() {
            options.clone().seed(self.seed)
        } else {
            options.clone()
        };
        self.port.generate(session, target, &options).await?;
        Ok(())
    }

    /// Like [`Self::generate`] but returns the reply text.
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub async fn complete(
        &self,
        session: &mut ConversationSession,
        target: &BackendTarget,
        options: &GenerationOptions,
    ) -> Result<String, StoryloomError> {
        self.generate(session, target, options).await?;
        Ok(session.last_assistant().unwrap_or_default().to_string())
    }

    /// One-shot request in a fresh session holding only `prompt`.
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub async fn ask(
        &self,
        prompt: impl Into<String>,
        target: &BackendTarget,
        options: &GenerationOptions,
    ) -> Result<String, StoryloomError> {
        let mut session = ConversationSession::with_user(prompt);
        self.complete(&mut session, target, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use storyloom_llm::LlmResult;

    struct Replies {
        queue: Mutex<Vec<String>>,
        seen: Mutex<Vec<LlmInvocation>>,
    }

    impl Replies {
        fn new(replies: &[&str]) -> Self {
            let mut queue: Vec<String> = replies.iter().map(|s| (*s).to_string()).collect();
            queue.reverse();
            Self {
                queue: Mutex::new(queue),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    struct ReplyBackend(Arc<Replies>);

    #[async_trait]
    impl LlmBackend for ReplyBackend {
        async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            self.0.seen.lock().unwrap().push(inv);
            let reply = self
                .0
                .queue
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::Transport("no more replies".into()))?;
            Ok(LlmResult::new(reply, "test", "test-model"))
        }
    }

    fn port(replies: &Arc<Replies>) -> LlmGenerationPort {
        LlmGenerationPort::new(Box::new(ReplyBackend(Arc::clone(replies))), "run", Duration::from_secs(5))
    }

    #[test]
    fn session_tracks_last_assistant() {
        let mut session = ConversationSession::with_system("sys");
        assert_eq!(session.last_assistant(), None);
        session.push_user("q");
        session.push_assistant("a1");
        session.push_user("q2");
        assert_eq!(session.last_assistant(), Some("a1"));
        assert_eq!(session.len(), 4);
        assert_eq!(session.user_turns(), 2);
    }

    #[tokio::test]
    async fn port_appends_reply_and_maps_options() {
        let replies = Arc::new(Replies::new(&["{\"ok\": true}"]));
        let port = port(&replies);
        let mut session = ConversationSession::with_user("hello");
        let options = GenerationOptions::new(Purpose::ChapterCount).seed(7);

        port.generate(&mut session, &BackendTarget::new("m1"), &options)
            .await
            .unwrap();

        assert_eq!(session.last_assistant(), Some("{\"ok\": true}"));
        let seen = replies.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].purpose, "chapter-count");
        assert_eq!(seen[0].model, "m1");
        assert_eq!(seen[0].seed(), Some(7));
        assert!(seen[0].metadata.contains_key("response_format"));
    }

    #[tokio::test]
    async fn short_replies_are_regenerated_with_offset_seed() {
        let replies = Arc::new(Replies::new(&["", "too short", "one two three four"]));
        let port = port(&replies);
        let mut session = ConversationSession::with_user("write");
        let options = GenerationOptions::new(Purpose::SceneWrite).seed(10).min_words(4);

        port.generate(&mut session, &BackendTarget::default(), &options)
            .await
            .unwrap();

        assert_eq!(session.last_assistant(), Some("one two three four"));
        assert_eq!(session.len(), 2);
        let seeds: Vec<_> = replies.seen.lock().unwrap().iter().map(|i| i.seed()).collect();
        assert_eq!(seeds, vec![Some(10), Some(11), Some(12)]);
    }

    #[tokio::test]
    async fn length_retries_are_bounded() {
        let replies = Arc::new(Replies::new(&["a", "b", "c", "d", "unused"]));
        let port = port(&replies);
        let mut session = ConversationSession::with_user("write");
        let options = GenerationOptions::new(Purpose::SceneWrite).min_words(50);

        port.generate(&mut session, &BackendTarget::default(), &options)
            .await
            .unwrap();

        assert_eq!(session.last_assistant(), Some("d"));
        assert_eq!(replies.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn generator_refuses_after_cancel() {
        let replies = Arc::new(Replies::new(&["x"]));
        let cancel = CancelFlag::new();
        let generator = Generator::new(Arc::new(port(&replies)), cancel.clone(), 3);
        cancel.cancel();

        let err = generator
            .ask("hi", &BackendTarget::default(), &GenerationOptions::new(Purpose::BaseContext))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(replies.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generator_fills_in_run_seed() {
        let replies = Arc::new(Replies::new(&["reply"]));
        let generator = Generator::new(Arc::new(port(&replies)), CancelFlag::new(), 42);

        let text = generator
            .ask("hi", &BackendTarget::default(), &GenerationOptions::new(Purpose::BaseContext))
            .await
            .unwrap();

        assert_eq!(text, "reply");
        assert_eq!(replies.seen.lock().unwrap()[0].seed(), Some(42));
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_llm_error() {
        let replies = Arc::new(Replies::new(&[]));
        let generator = Generator::new(Arc::new(port(&replies)), CancelFlag::new(), 1);

        let err = generator
            .ask("hi", &BackendTarget::default(), &GenerationOptions::new(Purpose::BaseContext))
            .await
            .unwrap_err();

        assert!(matches!(err, StoryloomError::Llm(LlmError::Transport(_))));
        assert!(err.is_fatal());
    }
}
