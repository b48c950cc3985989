//! External risk score provider port.
//!
//! The provider owns an off-system view of each user: an accumulated risk
//! score and its own "blocked" flag, which may disagree with the local
//! account status.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::model::UserId;

/// A collaborator could not answer in time or at all.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{collaborator} timed out after {elapsed:?}")]
    Timeout {
        collaborator: &'static str,
        elapsed: Duration,
    },

    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },
}

#[async_trait]
pub trait ScoreProvider: Send + Sync {
    /// Current accumulated risk score of a user.
    async fn total_score(&self, user: &UserId) -> Result<u32, CollaboratorError>;

    /// Whether the provider already considers the user blocked.
    async fn is_blocked(&self, user: &UserId) -> Result<bool, CollaboratorError>;

    /// Mark the user blocked on the provider side.
    async fn block(&self, user: &UserId) -> Result<(), CollaboratorError>;
}

/// Run a collaborator call with a deadline, mapping expiry to
/// [`CollaboratorError::Timeout`].
pub async fn with_timeout<T, F>(
    collaborator: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: std::future::Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            collaborator,
            elapsed: limit,
        }),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ScoreEntry {
    score: u32,
    blocked: bool,
}

/// Score provider backed by an in-process table. Unknown users score 0 and
/// are not blocked.
#[derive(Debug, Default)]
pub struct InMemoryScoreProvider {
    entries: DashMap<UserId, ScoreEntry>,
}

impl InMemoryScoreProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_score(&self, user: impl Into<UserId>, score: u32) {
        self.entries.entry(user.into()).or_default().score = score;
    }

    pub fn set_blocked(&self, user: impl Into<UserId>, blocked: bool) {
        self.entries.entry(user.into()).or_default().blocked = blocked;
    }

    pub fn blocked(&self, user: &UserId) -> bool {
        self.entries.get(user).is_some_and(|e| e.blocked)
    }
}

#[async_trait]
impl ScoreProvider for InMemoryScoreProvider {
    async fn total_score(&self, user: &UserId) -> Result<u32, CollaboratorError> {
        Ok(self.entries.get(user).map(|e| e.score).unwrap_or(0))
    }

    async fn is_blocked(&self, user: &UserId) -> Result<bool, CollaboratorError> {
        Ok(self.blocked(user))
    }

    async fn block(&self, user: &UserId) -> Result<(), CollaboratorError> {
        self.set_blocked(user.clone(), true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_user_scores_zero() {
        let provider = InMemoryScoreProvider::new();
        assert_eq!(provider.total_score(&"ghost".into()).await.unwrap(), 0);
        assert!(!provider.is_blocked(&"ghost".into()).await.unwrap());
    }

    #[tokio::test]
    async fn block_keeps_score() {
        let provider = InMemoryScoreProvider::new();
        provider.set_score("user_01", 55);
        provider.block(&"user_01".into()).await.unwrap();

        assert!(provider.is_blocked(&"user_01".into()).await.unwrap());
        assert_eq!(provider.total_score(&"user_01".into()).await.unwrap(), 55);
    }

    #[tokio::test]
    async fn timeout_maps_to_collaborator_error() {
        let result: Result<u32, _> = with_timeout("score provider", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert!(matches!(
            result,
            Err(CollaboratorError::Timeout {
                collaborator: "score provider",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout("score provider", Duration::from_secs(1), async { Ok(7u32) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
