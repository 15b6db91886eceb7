//! Quality-gated revision loop.
//!
//! Each round critiques and rates the current content, then either stops or
//! applies one revision. The decision order is fixed:
//!
//! 1. round > `max`: stop, the ceiling was reached (degraded, not an error)
//! 2. round > `min` and the rating passes: stop, converged
//! 3. otherwise revise and start the next round
//!
//! so at least `min` and at most `max` revisions are applied.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storyloom_utils::StoryloomError;
use tracing::{debug, info, warn};

/// Rater verdict for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub complete: bool,
    pub score: Option<u8>,
}

impl Rating {
    #[must_use]
    pub fn reject() -> Self {
        Self {
            complete: false,
            score: None,
        }
    }

    /// Complete, and scored at or above `threshold` when a score was given.
    #[must_use]
    pub fn passes(&self, threshold: u8) -> bool {
        self.complete && self.score.is_none_or(|s| s >= threshold)
    }
}

/// Critique and rating for one kind of content.
#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(&self, content: &str, context: &str) -> Result<String, StoryloomError>;

    async fn rate(&self, content: &str) -> Result<Rating, StoryloomError>;
}

/// Applies feedback to content. May keep its own conversation between calls.
#[async_trait]
pub trait Reviser: Send {
    async fn revise(&mut self, content: &str, feedback: &str) -> Result<String, StoryloomError>;
}

/// Revision bounds and acceptance bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionPolicy {
    pub min: u32,
    pub max: u32,
    pub threshold: u8,
    pub enabled: bool,
}

impl RevisionPolicy {
    #[must_use]
    pub fn new(min: u32, max: u32, threshold: u8) -> Self {
        Self {
            min,
            max,
            threshold,
            enabled: true,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min: 0,
            max: 0,
            threshold: 0,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    CeilingReached,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionOutcome {
    pub content: String,
    pub revisions: u32,
    pub stop: StopReason,
    pub last_feedback: String,
    pub last_rating: Option<Rating>,
}

impl RevisionOutcome {
    /// The loop gave up at its ceiling without the rating passing.
    #[must_use]
    pub fn degraded(&self) -> bool {
        self.stop == StopReason::CeilingReached
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QualityGatedRevisionLoop {
    policy: RevisionPolicy,
}

impl QualityGatedRevisionLoop {
    #[must_use]
    pub fn new(policy: RevisionPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> RevisionPolicy {
        self.policy
    }

    /// Revise `initial` until it converges or the ceiling is reached.
    ///
    /// Non-fatal critic failures count as a reject with empty feedback.
    ///
    /// # Errors
    ///
    /// Fatal errors (transport, cancellation) from the critic or reviser.
    pub async fn run(
        &self,
        initial: String,
        context: &str,
        critic: &dyn Critic,
        reviser: &mut dyn Reviser,
    ) -> Result<RevisionOutcome, StoryloomError> {
        if !self.policy.enabled {
            return Ok(RevisionOutcome {
                content: initial,
                revisions: 0,
                stop: StopReason::Disabled,
                last_feedback: String::new(),
                last_rating: None,
            });
        }

        let mut content = initial;
        let mut revisions = 0;
        let mut round = 0;
        loop {
            round += 1;

            let feedback = match critic.critique(&content, context).await {
                Ok(text) => text,
                Err(e) if !e.is_fatal() => {
                    warn!(round, error = %e, "Critique failed, continuing without feedback");
                    String::new()
                }
                Err(e) => return Err(e),
            };
            let rating = match critic.rate(&content).await {
                Ok(rating) => rating,
                Err(e) if !e.is_fatal() => {
                    warn!(round, error = %e, "Rating failed, treating as reject");
                    Rating::reject()
                }
                Err(e) => return Err(e),
            };
            let accepted = rating.passes(self.policy.threshold);
            debug!(
                round,
                accepted,
                score = rating.score,
                complete = rating.complete,
                "Revision round rated"
            );

            if round > self.policy.max {
                warn!(
                    revisions,
                    max = self.policy.max,
                    "Revision ceiling reached without convergence, keeping latest content"
                );
                return Ok(RevisionOutcome {
                    content,
                    revisions,
                    stop: StopReason::CeilingReached,
                    last_feedback: feedback,
                    last_rating: Some(rating),
                });
            }
            if round > self.policy.min && accepted {
                info!(revisions, "Revision loop converged");
                return Ok(RevisionOutcome {
                    content,
                    revisions,
                    stop: StopReason::Converged,
                    last_feedback: feedback,
                    last_rating: Some(rating),
                });
            }

            content = reviser.revise(&content, &feedback).await?;
            revisions += 1;
            debug!(revisions, "Revision applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use storyloom_utils::ConfigError;

    struct Scripted {
        ratings: Mutex<Vec<bool>>,
        fail_rate: bool,
    }

    impl Scripted {
        fn new(ratings: &[bool]) -> Self {
            let mut ratings = ratings.to_vec();
            ratings.reverse();
            Self {
                ratings: Mutex::new(ratings),
                fail_rate: false,
            }
        }
    }

    #[async_trait]
    impl Critic for Scripted {
        async fn critique(&self, content: &str, _context: &str) -> Result<String, StoryloomError> {
            Ok(format!("improve {content}"))
        }

        async fn rate(&self, _content: &str) -> Result<Rating, StoryloomError> {
            if self.fail_rate {
                return Err(ConfigError::MissingRequired("rater".into()).into());
            }
            let complete = self.ratings.lock().unwrap().pop().unwrap_or(false);
            Ok(Rating {
                complete,
                score: None,
            })
        }
    }

    #[derive(Default)]
    struct Counter {
        calls: u32,
    }

    #[async_trait]
    impl Reviser for Counter {
        async fn revise(&mut self, _content: &str, _feedback: &str) -> Result<String, StoryloomError> {
            self.calls += 1;
            Ok(format!("revision {}", self.calls))
        }
    }

    async fn run(policy: RevisionPolicy, critic: &Scripted) -> (RevisionOutcome, u32) {
        let mut reviser = Counter::default();
        let outcome = QualityGatedRevisionLoop::new(policy)
            .run("draft".into(), "ctx", critic, &mut reviser)
            .await
            .unwrap();
        (outcome, reviser.calls)
    }

    #[tokio::test]
    async fn min_forces_a_revision_despite_early_accept() {
        let critic = Scripted::new(&[true, true, true]);
        let (outcome, calls) = run(RevisionPolicy::new(1, 3, 0), &critic).await;
        assert_eq!(outcome.revisions, 1);
        assert_eq!(calls, 1);
        assert_eq!(outcome.stop, StopReason::Converged);
        assert_eq!(outcome.content, "revision 1");
    }

    #[tokio::test]
    async fn ceiling_returns_last_revision() {
        let critic = Scripted::new(&[false, false, false, false]);
        let (outcome, calls) = run(RevisionPolicy::new(1, 3, 0), &critic).await;
        assert_eq!(outcome.revisions, 3);
        assert_eq!(calls, 3);
        assert_eq!(outcome.stop, StopReason::CeilingReached);
        assert!(outcome.degraded());
        assert_eq!(outcome.content, "revision 3");
    }

    #[tokio::test]
    async fn zero_min_and_first_accept_returns_untouched() {
        let critic = Scripted::new(&[true]);
        let (outcome, calls) = run(RevisionPolicy::new(0, 3, 0), &critic).await;
        assert_eq!(calls, 0);
        assert_eq!(outcome.content, "draft");
        assert_eq!(outcome.stop, StopReason::Converged);
    }

    #[tokio::test]
    async fn zero_max_never_revises() {
        let critic = Scripted::new(&[false]);
        let (outcome, calls) = run(RevisionPolicy::new(0, 0, 0), &critic).await;
        assert_eq!(calls, 0);
        assert_eq!(outcome.stop, StopReason::CeilingReached);
    }

    #[tokio::test]
    async fn disabled_short_circuits() {
        let critic = Scripted::new(&[]);
        let (outcome, calls) = run(RevisionPolicy::disabled(), &critic).await;
        assert_eq!(calls, 0);
        assert_eq!(outcome.stop, StopReason::Disabled);
        assert_eq!(outcome.content, "draft");
        assert!(outcome.last_rating.is_none());
    }

    #[tokio::test]
    async fn non_fatal_rating_failure_counts_as_reject() {
        let mut critic = Scripted::new(&[]);
        critic.fail_rate = true;
        let (outcome, calls) = run(RevisionPolicy::new(0, 2, 0), &critic).await;
        assert_eq!(calls, 2);
        assert_eq!(outcome.stop, StopReason::CeilingReached);
        assert_eq!(outcome.last_rating, Some(Rating::reject()));
    }

    #[test]
    fn threshold_applies_only_to_scored_ratings() {
        let unscored = Rating {
            complete: true,
            score: None,
        };
        let low = Rating {
            complete: true,
            score: Some(60),
        };
        let high = Rating {
            complete: true,
            score: Some(90),
        };
        assert!(unscored.passes(85));
        assert!(!low.passes(85));
        assert!(high.passes(85));
        assert!(!Rating::reject().passes(0));
    }
}
