//! Account status store.

use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Account, AccountStatus, UserId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("account {0} not found")]
    NotFound(UserId),
}

/// Holds each user's credential and current status.
///
/// Implementations own their concurrency control: every operation is an
/// atomic single-key read or write, and concurrent status writes resolve
/// last-writer-wins.
pub trait AccountStore: Send + Sync {
    /// Snapshot of an account.
    fn account(&self, user: &UserId) -> Option<Account>;

    fn status(&self, user: &UserId) -> Option<AccountStatus> {
        self.account(user).map(|a| a.status)
    }

    /// Set a user's status, returning the previous one.
    fn set_status(&self, user: &UserId, status: AccountStatus) -> Result<AccountStatus, StoreError>;
}

/// In-memory account store.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<UserId, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.insert(account);
        }
        store
    }

    /// Provision an account, replacing any existing one with the same id.
    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountStore for InMemoryAccountStore {
    fn account(&self, user: &UserId) -> Option<Account> {
        self.accounts.get(user).map(|a| a.clone())
    }

    fn set_status(&self, user: &UserId, status: AccountStatus) -> Result<AccountStatus, StoreError> {
        let Some(mut account) = self.accounts.get_mut(user) else {
            warn!(user = %user, status = %status, "status update skipped: account not found");
            return Err(StoreError::NotFound(user.clone()));
        };

        let previous = std::mem::replace(&mut account.status, status);
        if previous != status {
            info!(user = %user, from = %previous, to = %status, "account status changed");
        }
        Ok(previous)
    }
}
