use std::sync::Arc;

use rust_decimal::Decimal;

use crate::cache::CostThresholdCache;
use crate::error::StoreError;
use crate::store::{AmountStatistics, StatisticsProvider};

/// Fewer samples than this never produce a threshold.
pub const MIN_SAMPLES: i64 = 10;

/// `mean - k * stddev`, or `None` when the statistics cannot support a
/// cutoff: too few samples, missing aggregates, or a non-positive result.
pub fn compute_threshold(stats: &AmountStatistics, k_factor: Decimal) -> Option<Decimal> {
    if stats.count < MIN_SAMPLES {
        return None;
    }

    let mean = stats.mean?;
    let stddev = stats.stddev_sample?;

    let threshold = mean.checked_sub(k_factor.checked_mul(stddev)?)?;
    (threshold > Decimal::ZERO).then_some(threshold)
}

/// Recomputes the cost cutoff from historical amounts.
pub struct ThresholdCalculator {
    stats: Arc<dyn StatisticsProvider>,
    cache: Arc<CostThresholdCache>,
    k_factor: Decimal,
}

impl ThresholdCalculator {
    pub fn new(
        stats: Arc<dyn StatisticsProvider>,
        cache: Arc<CostThresholdCache>,
        k_factor: Decimal,
    ) -> Self {
        Self {
            stats,
            cache,
            k_factor,
        }
    }

    /// Returns the new threshold when the cache was updated.
    pub async fn recalculate(&self) -> Result<Option<Decimal>, StoreError> {
        let stats = self.stats.aggregate().await?;

        match compute_threshold(&stats, self.k_factor) {
            Some(threshold) => {
                self.cache.set(threshold);
                tracing::info!(
                    count = stats.count,
                    mean = ?stats.mean,
                    stddev = ?stats.stddev_sample,
                    %threshold,
                    "Cost threshold updated"
                );
                Ok(Some(threshold))
            }
            None => {
                tracing::debug!(
                    count = stats.count,
                    mean = ?stats.mean,
                    stddev = ?stats.stddev_sample,
                    "Insufficient statistics, keeping previous threshold"
                );
                Ok(None)
            }
        }
    }
}
