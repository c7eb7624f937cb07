//! Periodic statistics logging and pending-command expiry.

use crate::correlation::PendingCommands;
use crate::router::{CounterSnapshot, TransportRouter};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Default reporting interval
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Logs router counters on a fixed interval
pub struct StatsReporter {
    router: Arc<TransportRouter>,
    pending: Option<Arc<PendingCommands>>,
    period: Duration,
}

impl StatsReporter {
    /// Create a reporter
    pub fn new(router: Arc<TransportRouter>, period: Duration) -> Self {
        Self {
            router,
            pending: None,
            period,
        }
    }

    /// Also expire unanswered commands on every tick
    pub fn with_pending(mut self, pending: Arc<PendingCommands>) -> Self {
        self.pending = Some(pending);
        self
    }

    /// One reporting pass; returns the snapshot that was logged
    pub fn report(&self) -> CounterSnapshot {
        let status = self.router.status();
        let c = status.counters;
        info!(
            "Router stats: transport={} connected={} seen={} decode_errors={} dropped={} hmac_failures={} unknown={} devices={} sent={} failed={} subscribers={}",
            status.transport,
            status.connected,
            c.messages_seen,
            c.decode_errors,
            c.frames_dropped,
            c.hmac_failures,
            c.unknown_devices,
            c.devices_known,
            c.commands_sent,
            c.commands_failed,
            status.subscribers
        );

        if let Some(pending) = &self.pending {
            let expired = pending.expire(Utc::now()).len();
            if expired > 0 {
                warn!("{} commands expired without a response, {} still pending", expired, pending.len());
            }
        }
        c
    }

    /// Report forever
    pub async fn run(self) {
        let mut ticker = interval(self.period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.report();
        }
    }
}
