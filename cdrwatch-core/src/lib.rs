//! # cdrwatch-core
//!
//! Core library for cdrwatch - a call detail record watcher for form-login
//! web portals.
//!
//! This library provides:
//! - An authenticated portal client (CSRF login, manual redirects, cookie jar)
//! - Record retrieval from a JSON endpoint with an HTML table fallback
//! - Normalization into [`CanonicalRecord`]s with deterministic ids
//! - Process-wide deduplication and per-account poll workers
//! - Notification sinks, heartbeat, configuration and logging
//!
//! ## Architecture
//!
//! ```text
//! Supervisor ──► PollWorker (one per account)
//!                  │ SessionManager ─► PortalTransport (own cookie jar)
//!                  │ RecordFetcher  ─► RawRecord
//!                  │ normalize      ─► CanonicalRecord
//!                  │ Deduplicator   (shared)
//!                  └ NotificationSink (shared)
//!            └──► heartbeat
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use cdrwatch_core::{sink, Config, Supervisor};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> cdrwatch_core::Result<()> {
//! let config = Config::load()?;
//! let sink = sink::from_config(&config)?;
//! let shutdown = CancellationToken::new();
//!
//! let supervisor = Supervisor::start(&config, sink, shutdown.clone())?;
//! tokio::signal::ctrl_c().await?;
//! shutdown.cancel();
//! supervisor.join().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use dedup::Deduplicator;
pub use error::{Error, Result};
pub use supervisor::Supervisor;
pub use types::*;
pub use worker::{PollWorker, WorkerState};

// Public modules
pub mod config;
pub mod dedup;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod normalize;
pub mod portal;
pub mod sink;
pub mod status;
pub mod supervisor;
pub mod types;
pub mod worker;
