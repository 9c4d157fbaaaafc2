//! Periodic liveness message

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::sink::NotificationSink;
use crate::status::{StatusSnapshot, WorkerStatus};

/// Render one heartbeat message covering every account
pub fn format_heartbeat(snapshots: &[StatusSnapshot]) -> String {
    let mut text = String::from("💓 Heartbeat\n━━━━━━━━━━━━━━━━\n✅ Monitoring is active\n");

    if snapshots.is_empty() {
        text.push_str("⚠️ No accounts are being polled\n");
    }
    for snap in snapshots {
        let state = if snap.online { "Online" } else { "Reconnecting..." };
        text.push_str(&format!(
            "📧 {}: {} ({} delivered)\n",
            snap.account, state, snap.delivered
        ));
    }

    text.push_str("━━━━━━━━━━━━━━━━");
    text
}

/// Announce status now and then every `interval` until `shutdown` fires.
pub async fn run(
    sink: Arc<dyn NotificationSink>,
    statuses: Vec<Arc<WorkerStatus>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshots: Vec<StatusSnapshot> = statuses.iter().map(|s| s.snapshot()).collect();
        match sink.announce(&format_heartbeat(&snapshots)).await {
            Ok(()) => tracing::info!(accounts = snapshots.len(), "Heartbeat sent"),
            Err(e) => tracing::warn!(error = %e, "Heartbeat failed"),
        }
    }

    tracing::debug!("Heartbeat stopped");
}
