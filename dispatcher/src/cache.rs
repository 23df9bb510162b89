//! Shared routing state read on every screening decision.
//!
//! Both caches are constructed once at startup and handed out as `Arc`s.
//! Every field is updated atomically on its own; readers may see a value
//! that is one refresh interval old.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use rust_decimal::Decimal;

use crate::processor_type::ProcessorType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub default_failing: bool,
    pub fallback_failing: bool,
}

#[derive(Debug, Default)]
pub struct HealthCache {
    default_failing: AtomicBool,
    fallback_failing: AtomicBool,
}

impl HealthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, processor: ProcessorType, failing: bool) {
        self.flag(processor).store(failing, Ordering::Release);
    }

    pub fn is_failing(&self, processor: ProcessorType) -> bool {
        self.flag(processor).load(Ordering::Acquire)
    }

    /// Reads both flags. The two loads are independent; no cross-flag
    /// consistency is implied.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            default_failing: self.is_failing(ProcessorType::Default),
            fallback_failing: self.is_failing(ProcessorType::Fallback),
        }
    }

    fn flag(&self, processor: ProcessorType) -> &AtomicBool {
        match processor {
            ProcessorType::Default => &self.default_failing,
            ProcessorType::Fallback => &self.fallback_failing,
        }
    }
}

/// Amount cutoff for cost-based routing.
///
/// Unset until the first valid computation lands. Callers decide how to
/// treat the unset state; [`CostThresholdCache::get_or_zero`] is what the
/// screening stage uses.
#[derive(Debug, Default)]
pub struct CostThresholdCache {
    threshold: ArcSwapOption<Decimal>,
}

impl CostThresholdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: Decimal) {
        self.threshold.store(Some(Arc::new(value)));
    }

    pub fn get(&self) -> Option<Decimal> {
        self.threshold.load().as_deref().copied()
    }

    pub fn get_or_zero(&self) -> Decimal {
        self.get().unwrap_or(Decimal::ZERO)
    }
}
