//! Worker supervision
//!
//! Starts one [`PollWorker`] per configured account plus the heartbeat task,
//! all sharing one [`Deduplicator`] and one sink. Accounts whose credentials
//! cannot be resolved are logged and skipped; the rest keep running.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, PortalConfig};
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::heartbeat;
use crate::portal::{HttpTransport, PortalTransport, RecordFetcher, SessionManager};
use crate::sink::NotificationSink;
use crate::status::WorkerStatus;
use crate::worker::{PollWorker, WorkerSettings};

/// Running workers and heartbeat
pub struct Supervisor {
    workers: Vec<JoinHandle<()>>,
    heartbeat: JoinHandle<()>,
    statuses: Vec<Arc<WorkerStatus>>,
    skipped: Vec<String>,
    dedup: Arc<Deduplicator>,
}

impl Supervisor {
    /// Start workers backed by real HTTP transports
    pub fn start(
        config: &Config,
        sink: Arc<dyn NotificationSink>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        Self::start_with(config, sink, shutdown, |portal| {
            Ok(Arc::new(HttpTransport::new(portal)?) as Arc<dyn PortalTransport>)
        })
    }

    /// Start workers using `make_transport` to build each account's transport.
    ///
    /// Each account gets its own transport so cookie jars are never shared.
    /// Fails only when configuration is unusable as a whole or no account
    /// could be started.
    pub fn start_with<F>(
        config: &Config,
        sink: Arc<dyn NotificationSink>,
        shutdown: CancellationToken,
        make_transport: F,
    ) -> Result<Self>
    where
        F: Fn(&PortalConfig) -> Result<Arc<dyn PortalTransport>>,
    {
        config.polling.validate()?;
        config.portal.validate()?;
        let profile = Arc::new(config.portal.profile()?);
        let settings = WorkerSettings::from(&config.polling);
        let dedup = Arc::new(Deduplicator::new());

        let mut workers = Vec::new();
        let mut statuses = Vec::new();
        let mut skipped = Vec::new();

        for account_config in &config.accounts {
            let account = match account_config.resolve() {
                Ok(account) => account,
                Err(e) => {
                    tracing::error!(
                        account = %account_config.identifier,
                        error = %e,
                        "Skipping account"
                    );
                    skipped.push(account_config.identifier.clone());
                    continue;
                }
            };

            let transport = make_transport(&config.portal)?;
            let session = SessionManager::new(account, transport, Arc::clone(&profile));
            let worker = PollWorker::new(
                session,
                RecordFetcher::new(Arc::clone(&profile)),
                Arc::clone(&dedup),
                Arc::clone(&sink),
                &settings,
            );

            statuses.push(worker.status());
            workers.push(tokio::spawn(worker.run(shutdown.clone())));
        }

        if workers.is_empty() {
            return Err(Error::Config("no usable accounts configured".to_string()));
        }

        tracing::info!(
            workers = workers.len(),
            skipped = skipped.len(),
            "Started poll workers"
        );

        let heartbeat = tokio::spawn(heartbeat::run(
            sink,
            statuses.clone(),
            config.polling.heartbeat_interval(),
            shutdown,
        ));

        Ok(Self {
            workers,
            heartbeat,
            statuses,
            skipped,
            dedup,
        })
    }

    pub fn statuses(&self) -> &[Arc<WorkerStatus>] {
        &self.statuses
    }

    /// Identifiers of accounts that were not started
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Wait for every task to finish (after the shutdown token is cancelled)
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Poll worker task failed");
            }
        }
        if let Err(e) = self.heartbeat.await {
            tracing::error!(error = %e, "Heartbeat task failed");
        }
    }
}
