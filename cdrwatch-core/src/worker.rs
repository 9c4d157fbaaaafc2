//! Per-account poll worker
//!
//! Each account runs one [`PollWorker`] task. The worker is a small state
//! machine:
//!
//! ```text
//!             login ok                 session lost
//! NeedLogin ────────────► Polling ─────────────────► NeedLogin
//!    │  ▲                  │  ▲
//!    │  │ backoff elapsed  └──┘ fetch → normalize → dedup → deliver,
//!    ▼  │                       then sleep the poll interval
//!  Backoff ◄── login failed `failure_threshold` times in a row
//! ```
//!
//! Below the threshold a failed login is retried after the poll interval.
//! From the threshold on, each failure pauses for
//! `min(floor * 2^(failures - threshold), ceiling)`; a successful login
//! resets the count.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::PollingConfig;
use crate::dedup::Deduplicator;
use crate::normalize::normalize_all;
use crate::portal::{RecordFetcher, SessionManager};
use crate::sink::NotificationSink;
use crate::status::WorkerStatus;

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NeedLogin,
    Polling,
    Backoff,
}

/// Consecutive login failure tracking
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    threshold: u32,
    floor: Duration,
    ceiling: Duration,
    failures: u32,
}

impl BackoffPolicy {
    pub fn new(threshold: u32, floor: Duration, ceiling: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            floor,
            ceiling: ceiling.max(floor),
            failures: 0,
        }
    }

    /// Count a failed login.
    ///
    /// Returns the backoff pause once the threshold is reached, `None` before.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        (self.failures >= self.threshold).then(|| self.pause_for(self.failures))
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Pause the next backoff would use
    pub fn next_pause(&self) -> Duration {
        self.pause_for(self.failures.saturating_add(1).max(self.threshold))
    }

    fn pause_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(self.threshold);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.floor.checked_mul(factor))
            .map_or(self.ceiling, |pause| pause.min(self.ceiling))
    }
}

/// Timing knobs for a worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub failure_threshold: u32,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for WorkerSettings {
    fn from(config: &PollingConfig) -> Self {
        Self {
            poll_interval: config.interval(),
            failure_threshold: config.failure_threshold,
            backoff_floor: Duration::from_secs(config.backoff_floor_secs),
            backoff_ceiling: Duration::from_secs(config.backoff_ceiling_secs),
        }
    }
}

/// Polls one account and forwards new records
pub struct PollWorker {
    session: SessionManager,
    fetcher: RecordFetcher,
    dedup: Arc<Deduplicator>,
    sink: Arc<dyn NotificationSink>,
    status: Arc<WorkerStatus>,
    poll_interval: Duration,
    backoff: BackoffPolicy,
    state: WorkerState,
}

impl PollWorker {
    pub fn new(
        session: SessionManager,
        fetcher: RecordFetcher,
        dedup: Arc<Deduplicator>,
        sink: Arc<dyn NotificationSink>,
        settings: &WorkerSettings,
    ) -> Self {
        let status = Arc::new(WorkerStatus::new(session.account().identifier()));
        Self {
            session,
            fetcher,
            dedup,
            sink,
            status,
            poll_interval: settings.poll_interval,
            backoff: BackoffPolicy::new(
                settings.failure_threshold,
                settings.backoff_floor,
                settings.backoff_ceiling,
            ),
            state: WorkerState::NeedLogin,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Shared status handle for the heartbeat task
    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is checked between steps, never in the middle of one.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let account = self.session.account().identifier().to_string();
        tracing::info!(account = %account, "Poll worker started");

        loop {
            let pause = self.step().await;

            if shutdown.is_cancelled() {
                break;
            }
            if pause.is_zero() {
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.status.set_offline();
        tracing::info!(account = %account, "Poll worker stopped");
    }

    /// Perform one state transition and return how long to wait before the next.
    pub async fn step(&mut self) -> Duration {
        match self.state {
            WorkerState::NeedLogin => self.try_login().await,
            WorkerState::Polling => {
                self.poll_cycle().await;
                if !self.session.is_authenticated() {
                    tracing::warn!(
                        account = %self.session.account().identifier(),
                        "Session lost, logging in again"
                    );
                    self.status.set_offline();
                    self.state = WorkerState::NeedLogin;
                }
                self.poll_interval
            }
            WorkerState::Backoff => {
                self.state = WorkerState::NeedLogin;
                Duration::ZERO
            }
        }
    }

    async fn try_login(&mut self) -> Duration {
        match self.session.login().await {
            Ok(_) => {
                self.backoff.record_success();
                self.status.record_login(Utc::now());
                self.state = WorkerState::Polling;
                Duration::ZERO
            }
            Err(e) => {
                let pause = self.backoff.record_failure();
                let failures = self.backoff.failures();
                self.status.record_login_failure(failures);

                match pause {
                    None => {
                        tracing::warn!(
                            account = %self.session.account().identifier(),
                            failures,
                            error = %e,
                            retry_in = ?self.poll_interval,
                            "Login failed"
                        );
                        self.poll_interval
                    }
                    Some(pause) => {
                        tracing::error!(
                            account = %self.session.account().identifier(),
                            failures,
                            error = %e,
                            backoff = ?pause,
                            "Login keeps failing, backing off. Verify the account credentials"
                        );
                        self.session.reset();
                        self.state = WorkerState::Backoff;
                        pause
                    }
                }
            }
        }
    }

    /// Fetch, normalize, deduplicate and deliver once.
    ///
    /// Returns the number of records delivered. Fetch errors end the cycle
    /// with nothing delivered.
    pub async fn poll_cycle(&mut self) -> usize {
        let account = self.session.account().identifier().to_string();

        let rows = match self.fetcher.fetch(&mut self.session).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "Fetch failed, skipping cycle");
                return 0;
            }
        };
        self.status.record_fetch(Utc::now());

        let mut delivered = 0;
        for record in normalize_all(&rows, &account) {
            if !self.dedup.should_emit(&record.id) {
                continue;
            }

            match self.sink.deliver(&record).await {
                Ok(()) => {
                    delivered += 1;
                    self.status.record_delivered();
                    tracing::info!(account = %account, id = %record.id, "Delivered record");
                }
                Err(e) => {
                    tracing::warn!(
                        account = %account,
                        id = %record.id,
                        error = %e,
                        "Failed to deliver record"
                    );
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::testing::{html, redirect, url, ScriptedTransport};
    use crate::portal::{LoginForm, PortalProfile, PortalResponse, PortalTransport};
    use crate::sink::RecordingSink;
    use crate::types::Account;

    const LOGIN_FORM: &str = r#"<form><input type="hidden" name="_token" value="tok"></form>"#;
    const API: &str = "/CDR/mycdrs?start=0&length=50";

    fn profile() -> Arc<PortalProfile> {
        Arc::new(PortalProfile {
            login_url: url("/login"),
            records_api_url: url(API),
            records_page_url: url("/CDR/mycdrs"),
            ranges_url: url("/myranges"),
            balance_url: url("/balance"),
            stats_url: url("/statistics"),
            form: LoginForm::default(),
            max_redirects: 10,
        })
    }

    fn worker(
        transport: &Arc<ScriptedTransport>,
        sink: &Arc<RecordingSink>,
        dedup: &Arc<Deduplicator>,
    ) -> PollWorker {
        let profile = profile();
        let session = SessionManager::new(
            Account::new("a@x.com", "pw"),
            transport.clone() as Arc<dyn PortalTransport>,
            Arc::clone(&profile),
        );
        PollWorker::new(
            session,
            RecordFetcher::new(profile),
            Arc::clone(dedup),
            sink.clone(),
            &WorkerSettings::default(),
        )
    }

    fn portal_with_login(post_reply: PortalResponse) -> Arc<ScriptedTransport> {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .on_get("/login", html("/login", LOGIN_FORM))
            .on_post("/login", post_reply);
        transport
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(5, Duration::from_secs(60), Duration::from_secs(3600))
    }

    #[test]
    fn test_no_backoff_below_threshold() {
        let mut backoff = policy();
        for _ in 0..4 {
            assert_eq!(backoff.record_failure(), None);
        }
        assert_eq!(backoff.failures(), 4);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = policy();
        for _ in 0..4 {
            backoff.record_failure();
        }

        let pauses: Vec<u64> = (0..9)
            .map(|_| backoff.record_failure().unwrap().as_secs())
            .collect();
        assert_eq!(pauses, vec![60, 120, 240, 480, 960, 1920, 3600, 3600, 3600]);
    }

    #[test]
    fn test_backoff_resets_on_success() {
        let mut backoff = policy();
        for _ in 0..7 {
            backoff.record_failure();
        }
        assert_eq!(backoff.next_pause(), Duration::from_secs(480));

        backoff.record_success();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_pause(), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_survives_huge_failure_counts() {
        let mut backoff = policy();
        backoff.failures = u32::MAX - 1;
        assert_eq!(backoff.record_failure(), Some(Duration::from_secs(3600)));
        assert_eq!(backoff.record_failure(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_settings_from_polling_config() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.failure_threshold, 5);
        assert_eq!(settings.backoff_floor, Duration::from_secs(60));
        assert_eq!(settings.backoff_ceiling, Duration::from_secs(3600));
    }

    // ============================================
    // PollWorker
    // ============================================

    #[tokio::test]
    async fn test_failed_logins_enter_backoff_and_recover() {
        let transport = portal_with_login(redirect("/login", "/login"));
        let sink = Arc::new(RecordingSink::default());
        let mut worker = worker(&transport, &sink, &Arc::new(Deduplicator::new()));

        for _ in 0..4 {
            assert_eq!(worker.step().await, Duration::from_secs(10));
            assert_eq!(worker.state(), WorkerState::NeedLogin);
        }
        assert_eq!(transport.resets(), 0);

        assert_eq!(worker.step().await, Duration::from_secs(60));
        assert_eq!(worker.state(), WorkerState::Backoff);
        assert_eq!(transport.resets(), 1);
        assert_eq!(worker.status().snapshot().consecutive_failures, 5);

        assert_eq!(worker.step().await, Duration::ZERO);
        assert_eq!(worker.state(), WorkerState::NeedLogin);

        assert_eq!(worker.step().await, Duration::from_secs(120));
        assert_eq!(worker.state(), WorkerState::Backoff);
        worker.step().await;

        transport.replace_post("/login", html("/home", "<h1>Dashboard</h1>"));
        assert_eq!(worker.step().await, Duration::ZERO);
        assert_eq!(worker.state(), WorkerState::Polling);
        assert_eq!(worker.backoff().failures(), 0);

        let snap = worker.status().snapshot();
        assert!(snap.online);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_polling_delivers_each_record_once() {
        let transport = portal_with_login(html("/home", "Dashboard"));
        transport.on_get(
            API,
            html(
                API,
                r#"{"data":[["+1555","+1777","t1","30","answered"],["+1666","+1777","t2","5","missed"]]}"#,
            ),
        );
        let sink = Arc::new(RecordingSink::default());
        let mut worker = worker(&transport, &sink, &Arc::new(Deduplicator::new()));

        worker.step().await;
        assert_eq!(worker.state(), WorkerState::Polling);

        assert_eq!(worker.step().await, Duration::from_secs(10));
        assert_eq!(worker.step().await, Duration::from_secs(10));
        assert_eq!(worker.state(), WorkerState::Polling);

        assert_eq!(sink.delivered_ids(), vec!["a@x.com|+1555|t1", "a@x.com|+1666|t2"]);
        assert_eq!(worker.status().snapshot().delivered, 2);
        assert_eq!(transport.count("GET", "/CDR/mycdrs"), 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let transport = portal_with_login(html("/home", "Dashboard"));
        transport.on_get(API, html(API, r#"[["+1555","+1777","t1"]]"#));
        let sink = Arc::new(RecordingSink::default());
        sink.failing.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut worker = worker(&transport, &sink, &Arc::new(Deduplicator::new()));

        worker.step().await;
        assert_eq!(worker.poll_cycle().await, 0);

        sink.failing.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(worker.poll_cycle().await, 0);
        assert!(sink.delivered_ids().is_empty());
    }

    #[tokio::test]
    async fn test_lost_session_returns_to_login() {
        let transport = portal_with_login(html("/home", "Dashboard"));
        transport.on_get(API, redirect(API, "/login"));
        let sink = Arc::new(RecordingSink::default());
        let mut worker = worker(&transport, &sink, &Arc::new(Deduplicator::new()));

        worker.step().await;
        assert!(worker.status().snapshot().online);

        assert_eq!(worker.step().await, Duration::from_secs(10));
        assert_eq!(worker.state(), WorkerState::NeedLogin);
        assert!(!worker.session().is_authenticated());
        assert!(!worker.status().snapshot().online);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_polling() {
        let transport = portal_with_login(html("/home", "Dashboard"));
        transport.fail_get(API, "connection reset");
        let sink = Arc::new(RecordingSink::default());
        let mut worker = worker(&transport, &sink, &Arc::new(Deduplicator::new()));

        worker.step().await;
        assert_eq!(worker.step().await, Duration::from_secs(10));
        assert_eq!(worker.state(), WorkerState::Polling);
        assert!(worker.status().snapshot().last_fetch_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval_until_cancelled() {
        let transport = portal_with_login(html("/home", "Dashboard"));
        transport.on_get(API, html(API, r#"[["+1555","+1777","t1"]]"#));
        let sink = Arc::new(RecordingSink::default());
        let worker = worker(&transport, &sink, &Arc::new(Deduplicator::new()));
        let status = worker.status();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(worker.run(shutdown.clone()));

        // polls at t = 0, 10, 20, 30
        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(transport.count("GET", API), 4);
        assert_eq!(sink.delivered_ids().len(), 1);
        assert!(!status.snapshot().online);
    }
}
