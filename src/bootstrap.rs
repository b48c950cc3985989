//! Wire a [`RiskEngine`] from configuration.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::baseline::EventLogBaseline;
use crate::config::Config;
use crate::engine::{Collaborators, RiskEngine};
use crate::model::Account;
use crate::publisher::{EventLogSink, EventPublisher, EventSink, LogSink, WebhookSink};
use crate::score::InMemoryScoreProvider;
use crate::store::InMemoryAccountStore;
use crate::velocity::{InMemoryVelocityCounter, spawn_sweeper};

/// A ready engine plus its background tasks: the worker draining the event
/// queue and the sweeper evicting elapsed velocity windows.
pub struct App {
    pub engine: RiskEngine,
    publisher_worker: JoinHandle<()>,
    velocity_sweeper: JoinHandle<()>,
}

impl App {
    /// Drop the engine and wait until every queued event has been handed
    /// to the sinks.
    pub async fn shutdown(self) {
        let App {
            engine,
            publisher_worker,
            velocity_sweeper,
        } = self;
        velocity_sweeper.abort();
        drop(engine);
        let _ = publisher_worker.await;
    }
}

/// Must be called from within a tokio runtime.
pub fn build(config: &Config) -> App {
    let accounts = Arc::new(InMemoryAccountStore::with_accounts(
        config.accounts.iter().map(Account::from),
    ));

    let scores = Arc::new(InMemoryScoreProvider::new());
    for entry in &config.scores {
        scores.set_score(entry.user.as_str(), entry.score);
        scores.set_blocked(entry.user.as_str(), entry.blocked);
    }

    let velocity = Arc::new(InMemoryVelocityCounter::new(config.velocity_window()));
    let velocity_sweeper = spawn_sweeper(velocity.clone(), config.velocity_window());

    let (publisher, publisher_worker) =
        EventPublisher::spawn(sinks(config), config.collaborator_timeout());

    let engine = RiskEngine::new(
        Collaborators {
            accounts: accounts.clone(),
            velocity,
            scores,
            baseline: Arc::new(EventLogBaseline::new(
                &config.baseline.log_dir,
                config.baseline.lookback_days,
                config.baseline.max_concurrent_scans,
            )),
            publisher,
        },
        config.engine_settings(),
    );

    info!(
        accounts = accounts.len(),
        scores = config.scores.len(),
        log_dir = %config.baseline.log_dir.display(),
        "engine ready"
    );

    App {
        engine,
        publisher_worker,
        velocity_sweeper,
    }
}

fn sinks(config: &Config) -> Vec<Arc<dyn EventSink>> {
    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
    if config.publisher.event_log {
        sinks.push(Arc::new(EventLogSink::new(&config.baseline.log_dir)));
    }
    if let Some(url) = &config.publisher.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.as_str())));
    }
    if config.publisher.log_events {
        sinks.push(Arc::new(LogSink));
    }
    sinks
}
