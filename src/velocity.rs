//! Fixed-window transfer velocity counter.
//!
//! The window starts on the first increment and is not extended by later
//! increments. Once it has elapsed the next increment opens a fresh window
//! with a count of one. Counts are telemetry only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::model::UserId;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock advanced by hand, for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

pub trait VelocityCounter: Send + Sync {
    /// Count this attempt and return the count within the current window.
    fn increment_and_get(&self, user: &UserId) -> u64;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

pub struct InMemoryVelocityCounter {
    windows: DashMap<UserId, Window>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryVelocityCounter {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            clock,
        }
    }

    /// Expiry of the user's live window, if there is one.
    pub fn expires_at(&self, user: &UserId) -> Option<Instant> {
        let now = self.clock.now();
        self.windows
            .get(user)
            .map(|w| w.expires_at)
            .filter(|expires_at| *expires_at > now)
    }

    /// Drop windows that have already elapsed.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.expires_at > now);
        let purged = before.saturating_sub(self.windows.len());
        if purged > 0 {
            debug!(purged, live = self.windows.len(), "velocity windows purged");
        }
    }

    /// Number of tracked windows, elapsed ones included until purged.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Purge elapsed windows every `every` until the returned task is aborted.
pub fn spawn_sweeper(counter: Arc<InMemoryVelocityCounter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            counter.purge_expired();
        }
    })
}

impl Default for InMemoryVelocityCounter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl VelocityCounter for InMemoryVelocityCounter {
    fn increment_and_get(&self, user: &UserId) -> u64 {
        let now = self.clock.now();
        // the entry guard holds the shard lock, so read-modify-write is atomic per key
        let mut entry = self.windows.entry(user.clone()).or_insert(Window {
            count: 0,
            expires_at: now + self.window,
        });

        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now + self.window,
            };
        }

        entry.count += 1;
        entry.count
    }
}
