use std::fmt;

use serde::Serialize;

use crate::Amount;
use crate::model::AccountStatus;

pub(crate) const LOGIN_SUCCESS: &str = "Login successful.";
pub(crate) const LOGIN_FAILURE: &str = "Login failed.";
pub(crate) const LOGIN_BLOCKED: &str = "Account blocked due to suspicious activity.";
pub(crate) const LOGIN_VERIFICATION: &str = "Additional verification is required to log in.";
pub(crate) const LOGOUT_SUCCESS: &str = "Logout successful.";
pub(crate) const LOGOUT_FAILURE: &str = "Logout failed.";
pub(crate) const TRANSFER_SUCCESS: &str = "Transfer completed successfully.";
pub(crate) const TRANSFER_ACCOUNT_BLOCKED: &str = "This account has been blocked.";
pub(crate) const TRANSFER_SUSPICIOUS: &str =
    "Suspicious activity detected. You will be logged out.";
pub(crate) const TRANSFER_VERIFICATION: &str =
    "Security check required. Please complete additional verification.";

/// What the caller should do with the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Allowed,
    VerificationRequired,
    /// Terminate the user's active session immediately.
    ForceLogout,
    Blocked,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "ALLOWED",
            Outcome::VerificationRequired => "VERIFICATION_REQUIRED",
            Outcome::ForceLogout => "FORCE_LOGOUT",
            Outcome::Blocked => "BLOCKED",
            Outcome::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transfer details echoed back on every transfer decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEcho {
    pub amount: Amount,
    pub destination: String,
}

/// Result of one attempt, with a short user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferEcho>,
}

impl Decision {
    pub(crate) fn new(outcome: Outcome, message: &'static str) -> Self {
        Self {
            outcome,
            message,
            transfer: None,
        }
    }

    pub(crate) fn with_transfer(mut self, echo: TransferEcho) -> Self {
        self.transfer = Some(echo);
        self
    }
}

/// Status transition applied by a risk report or operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: AccountStatus,
    pub current: AccountStatus,
}

impl StatusChange {
    pub fn is_noop(&self) -> bool {
        self.previous == self.current
    }
}
