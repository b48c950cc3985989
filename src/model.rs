//! Core domain types for the risk decision engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Amount;
use crate::origin::Origin;

/// Stable user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_string())
    }
}

/// Account status as held by the account store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    #[default]
    Normal,
    /// Logins require an additional verification step.
    Medium,
    Blocked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Normal => "NORMAL",
            AccountStatus::Medium => "MEDIUM",
            AccountStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse risk bucket derived from a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const HIGH_THRESHOLD: u32 = 70;
    pub const MEDIUM_THRESHOLD: u32 = 40;

    pub fn from_score(score: u32) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            RiskLevel::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Parse a risk report level. Anything other than `MEDIUM` or `HIGH`
    /// (case-insensitive) is treated as `LOW`.
    pub fn from_report(level: &str) -> Self {
        match level.trim().to_ascii_uppercase().as_str() {
            "HIGH" => RiskLevel::High,
            "MEDIUM" => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    /// Status an external risk report at this level moves the account to.
    pub fn to_status(self) -> AccountStatus {
        match self {
            RiskLevel::Low => AccountStatus::Normal,
            RiskLevel::Medium => AccountStatus::Medium,
            RiskLevel::High => AccountStatus::Blocked,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        };
        f.write_str(s)
    }
}

/// A provisioned account.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: UserId,
    /// Opaque secret, compared for equality only.
    pub credential: String,
    pub status: AccountStatus,
}

impl Account {
    pub fn new(id: impl Into<UserId>, credential: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            credential: credential.into(),
            status: AccountStatus::Normal,
        }
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    pub fn credential_matches(&self, secret: &str) -> bool {
        self.credential == secret
    }
}

/// Fixed transfer destination echoed back to callers and published on
/// transfer events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Destination {
    pub label: String,
    pub account_ref: String,
}

impl Default for Destination {
    fn default() -> Self {
        Self {
            label: "Woori".to_string(),
            account_ref: "110-***-1234".to_string(),
        }
    }
}

/// Kind of a published or historical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Login,
    Logout,
    Transfer,
}

/// An inbound attempt, the possible inputs of the engine.
#[derive(Debug, Clone)]
pub enum Attempt {
    Login {
        user: UserId,
        credential: String,
        origin: Origin,
    },
    Logout {
        user: UserId,
        origin: Origin,
    },
    Transfer {
        user: UserId,
        amount: Amount,
        verified: bool,
        origin: Origin,
    },
    /// Risk analysis result pushed by the external pipeline.
    RiskReport { user: UserId, level: RiskLevel },
}

impl Attempt {
    pub fn kind(&self) -> &'static str {
        match self {
            Attempt::Login { .. } => "login",
            Attempt::Logout { .. } => "logout",
            Attempt::Transfer { .. } => "transfer",
            Attempt::RiskReport { .. } => "risk_report",
        }
    }

    pub fn user(&self) -> &UserId {
        match self {
            Attempt::Login { user, .. }
            | Attempt::Logout { user, .. }
            | Attempt::Transfer { user, .. }
            | Attempt::RiskReport { user, .. } => user,
        }
    }
}
