//! Error types for decision evaluation.

use thiserror::Error;

use crate::model::UserId;

/// Reason an attempt was turned into a `FAILURE` decision.
///
/// The detail is logged only; callers see a generic message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("invalid credential for user {0}")]
    InvalidCredential(UserId),
}
