//! Screening: decides where each intake message goes next.
//!
//! [`decide`] is a pure function of the health snapshot, the cost threshold,
//! the message and a random source. [`ScreeningRouter`] reads the caches,
//! calls it and enqueues the message; that enqueue is its only side effect.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;

use crate::cache::{CostThresholdCache, HealthCache, HealthSnapshot};
use crate::error::{ConfigError, DispatchError};
use crate::message::Message;
use crate::queue::{Handler, SendOutcome, WorkQueue};

/// Base chance, in percentage points, of forcing a retry while both
/// processors are failing.
const ESCALATION_BASE: u32 = 30;
const ESCALATION_STEP: u32 = 10;
pub const ESCALATION_CAP: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Served by the fallback processor.
    High,
    /// Served by the default processor.
    Low,
    /// Delayed, then screened again.
    Wait,
}

/// How traffic is split while both processors are healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitPolicy {
    /// Amounts above the cost threshold go to the default processor.
    #[default]
    CostThreshold,
    /// A fixed share of traffic, in percent, goes to the fallback processor.
    Ratio { high_percent: u8 },
}

impl FromStr for SplitPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::Invalid {
            name: "SPLIT_POLICY",
            value: s.to_string(),
            reason: reason.to_string(),
        };

        match s.trim() {
            "cost" => Ok(SplitPolicy::CostThreshold),
            other => {
                let percent = other
                    .strip_prefix("ratio:")
                    .ok_or_else(|| invalid("expected `cost` or `ratio:<0-100>`"))?;
                let high_percent: u8 = percent
                    .parse()
                    .map_err(|_| invalid("ratio must be an integer"))?;
                if high_percent > 100 {
                    return Err(invalid("ratio must be between 0 and 100"));
                }
                Ok(SplitPolicy::Ratio { high_percent })
            }
        }
    }
}

impl fmt::Display for SplitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitPolicy::CostThreshold => write!(f, "cost"),
            SplitPolicy::Ratio { high_percent } => write!(f, "ratio:{}", high_percent),
        }
    }
}

/// Chance, in percentage points, that a message is pushed to a processor
/// even though both are failing. Grows with every pass through the waiting
/// room and is capped; a message that was never delayed is never forced.
pub fn escalation_chance(reprocess_count: u32) -> u32 {
    if reprocess_count == 0 {
        return 0;
    }

    ESCALATION_STEP
        .saturating_mul(reprocess_count)
        .saturating_add(ESCALATION_BASE)
        .min(ESCALATION_CAP)
}

#[derive(Debug, Clone, Copy)]
pub struct RoutingInput {
    pub health: HealthSnapshot,
    pub threshold: Decimal,
    pub amount: Decimal,
    pub reprocess_count: u32,
}

pub fn decide<R: Rng + ?Sized>(input: &RoutingInput, policy: SplitPolicy, rng: &mut R) -> Route {
    match (input.health.default_failing, input.health.fallback_failing) {
        (false, false) => match policy {
            SplitPolicy::CostThreshold => {
                if input.amount > input.threshold {
                    Route::Low
                } else {
                    Route::High
                }
            }
            SplitPolicy::Ratio { high_percent } => {
                if rng.gen_range(0..100u32) < u32::from(high_percent) {
                    Route::High
                } else {
                    Route::Low
                }
            }
        },
        (true, false) => Route::High,
        (false, true) => Route::Low,
        (true, true) => {
            let chance = escalation_chance(input.reprocess_count);
            if chance > 0 && rng.gen_range(0..100u32) < chance {
                if rng.gen_bool(0.5) { Route::High } else { Route::Low }
            } else {
                Route::Wait
            }
        }
    }
}

pub struct ScreeningRouter {
    healths: Arc<HealthCache>,
    threshold: Arc<CostThresholdCache>,
    policy: SplitPolicy,
    high_priority: Arc<WorkQueue<Message>>,
    low_priority: Arc<WorkQueue<Message>>,
    waiting_room: Arc<WorkQueue<Message>>,
}

impl ScreeningRouter {
    pub fn new(
        healths: Arc<HealthCache>,
        threshold: Arc<CostThresholdCache>,
        policy: SplitPolicy,
        high_priority: Arc<WorkQueue<Message>>,
        low_priority: Arc<WorkQueue<Message>>,
        waiting_room: Arc<WorkQueue<Message>>,
    ) -> Self {
        Self {
            healths,
            threshold,
            policy,
            high_priority,
            low_priority,
            waiting_room,
        }
    }

    pub fn route(&self, msg: &Message) -> Route {
        let input = RoutingInput {
            health: self.healths.snapshot(),
            threshold: self.threshold.get_or_zero(),
            amount: msg.amount,
            reprocess_count: msg.reprocess_count,
        };

        decide(&input, self.policy, &mut rand::thread_rng())
    }

    fn queue_for(&self, route: Route) -> &WorkQueue<Message> {
        match route {
            Route::High => &self.high_priority,
            Route::Low => &self.low_priority,
            Route::Wait => &self.waiting_room,
        }
    }
}

#[async_trait]
impl Handler<Message> for ScreeningRouter {
    async fn handle(&self, msg: Message) -> Result<(), DispatchError> {
        let route = self.route(&msg);
        let queue = self.queue_for(route);

        tracing::debug!(
            item_id = %msg.id,
            amount = %msg.amount,
            reprocess_count = msg.reprocess_count,
            queue = queue.name(),
            "Screened message"
        );

        match queue.send(msg) {
            SendOutcome::Closed => Err(DispatchError::QueueClosed(queue.name())),
            SendOutcome::Queued | SendOutcome::Overflowed => Ok(()),
        }
    }
}
