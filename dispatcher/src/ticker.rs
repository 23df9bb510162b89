use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{MissedTickBehavior, interval};

use crate::error::DispatchError;
use crate::health_monitor::HealthMonitor;
use crate::lifecycle::ShutdownSignal;
use crate::sweeper::FallbackSweeper;
use crate::threshold::ThresholdCalculator;

/// Work run on a fixed interval, independent of request traffic.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    async fn tick(&self) -> Result<(), DispatchError>;
}

/// Runs `task` every `period` until `shutdown` fires. The first tick runs
/// immediately. A failed tick is logged and the loop keeps going.
pub async fn run_periodic<P>(
    name: &'static str,
    period: Duration,
    mut shutdown: ShutdownSignal,
    task: Arc<P>,
) where
    P: PeriodicTask + ?Sized,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = task.tick().await {
                    tracing::warn!(task = name, error = %e, "Periodic task failed");
                }
            }
        }
    }

    tracing::info!(task = name, "Periodic task stopped");
}

#[async_trait]
impl PeriodicTask for HealthMonitor {
    async fn tick(&self) -> Result<(), DispatchError> {
        self.refresh().await;
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for ThresholdCalculator {
    async fn tick(&self) -> Result<(), DispatchError> {
        self.recalculate().await?;
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for FallbackSweeper {
    async fn tick(&self) -> Result<(), DispatchError> {
        self.sweep();
        Ok(())
    }
}
