//! Risk decision engine.
//!
//! The engine decides whether a login, logout, or transfer attempt is
//! allowed, challenged, or denied. It combines the account status, the
//! external risk score, and the caller's verification flag. Every call takes
//! `&self`, so one engine can be shared by any number of concurrent
//! handlers. Also supports an async stream of attempts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::Amount;
use crate::baseline::Baseline;
use crate::model::{AccountStatus, Attempt, Destination, EventType, RiskLevel, UserId};
use crate::origin::{Origin, ResolvedOrigin};
use crate::publisher::{EventPublisher, EventRecord, EventResult};
use crate::score::{ScoreProvider, with_timeout};
use crate::store::{AccountStore, StoreError};
use crate::velocity::VelocityCounter;

mod decision;
pub use decision::{Decision, Outcome, StatusChange, TransferEcho};
use decision::*;

mod error;
pub use error::DecisionError;

pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables of the decision flow.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on each score provider call.
    pub collaborator_timeout: Duration,
    pub destination: Destination,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
            destination: Destination::default(),
        }
    }
}

/// Everything the engine consults or writes to.
pub struct Collaborators {
    pub accounts: Arc<dyn AccountStore>,
    pub velocity: Arc<dyn VelocityCounter>,
    pub scores: Arc<dyn ScoreProvider>,
    pub baseline: Arc<dyn Baseline>,
    pub publisher: EventPublisher,
}

/// Engine reply to any [`Attempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Decision(Decision),
    Status(Result<StatusChange, StoreError>),
}

/// Where a transfer ends up once the score has been bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferVerdict {
    AutoBlock,
    VerificationRequired,
    Allowed(EventResult),
}

/// Login checks that passed far enough to produce a non-failure outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginVerdict {
    Blocked,
    MidVerification,
    Allowed,
}

pub struct RiskEngine {
    accounts: Arc<dyn AccountStore>,
    velocity: Arc<dyn VelocityCounter>,
    scores: Arc<dyn ScoreProvider>,
    baseline: Arc<dyn Baseline>,
    publisher: EventPublisher,
    settings: EngineSettings,
}

/// Public API
impl RiskEngine {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        Self {
            accounts: collaborators.accounts,
            velocity: collaborators.velocity,
            scores: collaborators.scores,
            baseline: collaborators.baseline,
            publisher: collaborators.publisher,
            settings,
        }
    }

    /// Run the engine over a stream of attempts, handing every reply to
    /// `on_reply` in input order.
    pub async fn run(
        &self,
        mut stream: impl Stream<Item = Attempt> + Unpin,
        mut on_reply: impl FnMut(&Attempt, Reply),
    ) {
        while let Some(attempt) = stream.next().await {
            let reply = self.apply(&attempt).await;
            on_reply(&attempt, reply);
        }
    }

    /// Apply a single attempt.
    pub async fn apply(&self, attempt: &Attempt) -> Reply {
        match attempt {
            Attempt::Login {
                user,
                credential,
                origin,
            } => Reply::Decision(self.login(user, credential, origin)),
            Attempt::Logout { user, origin } => Reply::Decision(self.logout(user, origin)),
            Attempt::Transfer {
                user,
                amount,
                verified,
                origin,
            } => Reply::Decision(self.transfer(user, *amount, *verified, origin).await),
            Attempt::RiskReport { user, level } => {
                Reply::Status(self.apply_risk_report(user, *level))
            }
        }
    }

    /// Evaluate a login attempt. Precedence: unknown user, blocked status,
    /// credential mismatch, medium status, allowed.
    pub fn login(&self, user: &UserId, credential: &str, origin: &Origin) -> Decision {
        let origin = origin.resolve();

        let (decision, result) = match self.evaluate_login(user, credential) {
            Ok(LoginVerdict::Blocked) => {
                warn!(user = %user, country = %origin.country, src_ip = %origin.source_ip, "login blocked");
                (Decision::new(Outcome::Blocked, LOGIN_BLOCKED), EventResult::Blocked)
            }
            Ok(LoginVerdict::MidVerification) => {
                warn!(user = %user, country = %origin.country, src_ip = %origin.source_ip, "login requires verification");
                (
                    Decision::new(Outcome::VerificationRequired, LOGIN_VERIFICATION),
                    EventResult::MidVerification,
                )
            }
            Ok(LoginVerdict::Allowed) => {
                info!(user = %user, country = %origin.country, src_ip = %origin.source_ip, "login allowed");
                (Decision::new(Outcome::Allowed, LOGIN_SUCCESS), EventResult::Success)
            }
            Err(e) => {
                warn!(user = %user, reason = %e, "login failed");
                (Decision::new(Outcome::Failure, LOGIN_FAILURE), EventResult::Failure)
            }
        };

        self.publish_auth(EventType::Login, user, result, &origin);
        decision
    }

    /// Evaluate a logout. Status and credentials are not consulted.
    pub fn logout(&self, user: &UserId, origin: &Origin) -> Decision {
        let origin = origin.resolve();

        // Unlike login, an unknown user on logout publishes no event. The two
        // paths disagree; kept as-is until the downstream pipeline settles
        // whether FAILURE telemetry is wanted for both.
        if self.accounts.account(user).is_none() {
            warn!(user = %user, reason = %DecisionError::UserNotFound(user.clone()), "logout failed");
            return Decision::new(Outcome::Failure, LOGOUT_FAILURE);
        }

        self.publish_auth(EventType::Logout, user, EventResult::Success, &origin);
        info!(user = %user, country = %origin.country, src_ip = %origin.source_ip, "logout");
        Decision::new(Outcome::Allowed, LOGOUT_SUCCESS)
    }

    /// Evaluate a transfer attempt:
    /// - Count the attempt in the velocity window
    /// - Deny if the score provider already blocks the user
    /// - Bucket the score; HIGH auto-blocks, MEDIUM asks for verification
    ///   unless the caller already verified
    /// - On allow, compute the baseline and publish the transfer event
    pub async fn transfer(
        &self,
        user: &UserId,
        amount: Amount,
        verified: bool,
        origin: &Origin,
    ) -> Decision {
        let now = Local::now();
        let origin = origin.resolve();
        let echo = TransferEcho {
            amount,
            destination: self.settings.destination.label.clone(),
        };

        let window_count = self.velocity.increment_and_get(user);
        info!(user = %user, window_count, "transfer attempt counted");

        if self.externally_blocked(user).await {
            warn!(user = %user, amount = %amount, window_count, "transfer denied: account blocked by score provider");
            return Decision::new(Outcome::ForceLogout, TRANSFER_ACCOUNT_BLOCKED).with_transfer(echo);
        }

        let score = self.score(user).await;
        let risk = RiskLevel::from_score(score);

        match Self::transfer_verdict(risk, verified) {
            TransferVerdict::AutoBlock => {
                warn!(user = %user, amount = %amount, score, verified, window_count, "transfer denied: auto-blocking high risk user");
                self.auto_block(user).await;
                Decision::new(Outcome::ForceLogout, TRANSFER_SUSPICIOUS).with_transfer(echo)
            }
            TransferVerdict::VerificationRequired => {
                warn!(user = %user, amount = %amount, score, window_count, "transfer requires verification");
                Decision::new(Outcome::VerificationRequired, TRANSFER_VERIFICATION).with_transfer(echo)
            }
            TransferVerdict::Allowed(result) => {
                let avg_amount = self.baseline.average_amount(user, now.date_naive()).await;
                self.publisher.publish(EventRecord::transfer(
                    user,
                    result,
                    &origin,
                    amount,
                    &self.settings.destination,
                    avg_amount,
                    now,
                ));
                info!(
                    user = %user,
                    amount = %amount,
                    avg_amount,
                    score,
                    risk = %risk,
                    verified,
                    window_count,
                    country = %origin.country,
                    src_ip = %origin.source_ip,
                    to_bank = %self.settings.destination.label,
                    "transfer allowed"
                );
                Decision::new(Outcome::Allowed, TRANSFER_SUCCESS).with_transfer(echo)
            }
        }
    }

    /// Apply an external risk report: LOW, MEDIUM, HIGH move the account to
    /// NORMAL, MEDIUM, BLOCKED. Re-applying the same level is a no-op.
    pub fn apply_risk_report(
        &self,
        user: &UserId,
        level: RiskLevel,
    ) -> Result<StatusChange, StoreError> {
        let change = self.set_status(user, level.to_status())?;
        match level {
            RiskLevel::Low => info!(user = %user, risk = %level, status = %change.current, "risk report applied"),
            _ => warn!(user = %user, risk = %level, status = %change.current, "risk report applied"),
        }
        Ok(change)
    }

    /// Operator block.
    pub fn block(&self, user: &UserId) -> Result<StatusChange, StoreError> {
        self.set_status(user, AccountStatus::Blocked)
    }

    /// Operator unblock, back to NORMAL.
    pub fn unblock(&self, user: &UserId) -> Result<StatusChange, StoreError> {
        self.set_status(user, AccountStatus::Normal)
    }

    pub fn set_medium(&self, user: &UserId) -> Result<StatusChange, StoreError> {
        self.set_status(user, AccountStatus::Medium)
    }

    pub fn status(&self, user: &UserId) -> Option<AccountStatus> {
        self.accounts.status(user)
    }
}

/// Private API
impl RiskEngine {
    fn evaluate_login(&self, user: &UserId, credential: &str) -> Result<LoginVerdict, DecisionError> {
        let account = self
            .accounts
            .account(user)
            .ok_or_else(|| DecisionError::UserNotFound(user.clone()))?;

        // blocked accounts are denied before the credential is looked at
        if account.status == AccountStatus::Blocked {
            return Ok(LoginVerdict::Blocked);
        }

        if !account.credential_matches(credential) {
            return Err(DecisionError::InvalidCredential(user.clone()));
        }

        if account.status == AccountStatus::Medium {
            return Ok(LoginVerdict::MidVerification);
        }

        Ok(LoginVerdict::Allowed)
    }

    fn transfer_verdict(risk: RiskLevel, verified: bool) -> TransferVerdict {
        match (risk, verified) {
            (RiskLevel::High, _) => TransferVerdict::AutoBlock,
            (_, true) => TransferVerdict::Allowed(EventResult::Verified),
            (RiskLevel::Medium, false) => TransferVerdict::VerificationRequired,
            (RiskLevel::Low, false) => TransferVerdict::Allowed(EventResult::Success),
        }
    }

    fn set_status(&self, user: &UserId, status: AccountStatus) -> Result<StatusChange, StoreError> {
        let previous = self.accounts.set_status(user, status)?;
        Ok(StatusChange {
            previous,
            current: status,
        })
    }

    /// An unavailable provider counts as "not blocked".
    async fn externally_blocked(&self, user: &UserId) -> bool {
        let call = self.scores.is_blocked(user);
        match with_timeout("score provider", self.settings.collaborator_timeout, call).await {
            Ok(blocked) => blocked,
            Err(e) => {
                error!(user = %user, error = %e, "block flag unavailable, assuming not blocked");
                false
            }
        }
    }

    /// An unavailable provider counts as score 0, i.e. LOW risk.
    async fn score(&self, user: &UserId) -> u32 {
        let call = self.scores.total_score(user);
        match with_timeout("score provider", self.settings.collaborator_timeout, call).await {
            Ok(score) => score,
            Err(e) => {
                error!(user = %user, error = %e, "risk score unavailable, treating as LOW");
                0
            }
        }
    }

    /// Best-effort block on both the provider and the local store.
    async fn auto_block(&self, user: &UserId) {
        let call = self.scores.block(user);
        if let Err(e) = with_timeout("score provider", self.settings.collaborator_timeout, call).await {
            error!(user = %user, error = %e, "auto-block not recorded by score provider");
        }
        if let Err(e) = self.accounts.set_status(user, AccountStatus::Blocked) {
            debug!(user = %user, error = %e, "auto-block not recorded locally");
        }
    }

    fn publish_auth(&self, event_type: EventType, user: &UserId, result: EventResult, origin: &ResolvedOrigin) {
        self.publisher
            .publish(EventRecord::auth(event_type, user, result, origin, Local::now()));
    }
}
