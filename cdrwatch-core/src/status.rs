//! Per-worker status shared with the heartbeat task

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Live counters for one poll worker.
///
/// Written by the worker, read by the heartbeat task.
#[derive(Debug)]
pub struct WorkerStatus {
    account: String,
    online: AtomicBool,
    logins: AtomicU64,
    delivered: AtomicU64,
    consecutive_failures: AtomicU32,
    last_login_at: Mutex<Option<DateTime<Utc>>>,
    last_fetch_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of a [`WorkerStatus`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub account: String,
    pub online: bool,
    pub logins: u64,
    pub delivered: u64,
    pub consecutive_failures: u32,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_fetch_at: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            online: AtomicBool::new(false),
            logins: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_login_at: Mutex::new(None),
            last_fetch_at: Mutex::new(None),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn record_login(&self, at: DateTime<Utc>) {
        self.online.store(true, Ordering::Relaxed);
        self.logins.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_login_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn record_login_failure(&self, consecutive: u32) {
        self.online.store(false, Ordering::Relaxed);
        self.consecutive_failures.store(consecutive, Ordering::Relaxed);
    }

    pub fn set_offline(&self) {
        self.online.store(false, Ordering::Relaxed);
    }

    pub fn record_fetch(&self, at: DateTime<Utc>) {
        *self.last_fetch_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            account: self.account.clone(),
            online: self.online.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_login_at: *self.last_login_at.lock().unwrap_or_else(PoisonError::into_inner),
            last_fetch_at: *self.last_fetch_at.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}
