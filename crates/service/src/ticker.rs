//! Periodic wait-ledger accrual.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::service::{Availability, QueueService};

/// Background task that calls [`QueueService::tick`] every `period`.
pub struct WaitTicker {
    service: Arc<QueueService>,
    period: Duration,
}

impl WaitTicker {
    pub fn new(service: Arc<QueueService>, period: Duration) -> Self {
        Self { service, period }
    }

    /// Run until `cancel` fires. A tick that finds presence unavailable is
    /// skipped and retried at the next period.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Wait ticker cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Availability::Unavailable = self.service.tick().await {
                        tracing::warn!("Skipping wait tick, presence unavailable");
                    }
                }
            }
        }
    }
}
