//! In-memory stand-ins for the processors and the database.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dispatcher::config::{PipelineConfig, QueueConfig};
use dispatcher::error::{ProcessorError, StoreError};
use dispatcher::processor_client::{PaymentRequest, ProcessorClient, ProcessorHealth, SubmitOutcome};
use dispatcher::processor_type::ProcessorType;
use dispatcher::screening::SplitPolicy;
use dispatcher::store::{
    AmountStatistics, PaymentRecord, PaymentRepository, PaymentsSummary, StatisticsProvider,
};
use time::OffsetDateTime;

/// How a fake processor answers payment submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    Reject,
    Fail,
}

/// Two scripted processors behind one client.
pub struct FakeProcessors {
    default: Mutex<Behavior>,
    fallback: Mutex<Behavior>,
    default_health: Mutex<ProcessorHealth>,
    fallback_health: Mutex<ProcessorHealth>,
    calls: Mutex<Vec<(ProcessorType, PaymentRequest)>>,
}

impl FakeProcessors {
    pub fn new(default: Behavior, fallback: Behavior) -> Self {
        let healthy = ProcessorHealth {
            failing: false,
            min_response_time: 0,
        };
        Self {
            default: Mutex::new(default),
            fallback: Mutex::new(fallback),
            default_health: Mutex::new(healthy),
            fallback_health: Mutex::new(healthy),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, processor: ProcessorType, behavior: Behavior) {
        match processor {
            ProcessorType::Default => *self.default.lock().unwrap() = behavior,
            ProcessorType::Fallback => *self.fallback.lock().unwrap() = behavior,
        }
    }

    pub fn set_health(&self, processor: ProcessorType, health: ProcessorHealth) {
        match processor {
            ProcessorType::Default => *self.default_health.lock().unwrap() = health,
            ProcessorType::Fallback => *self.fallback_health.lock().unwrap() = health,
        }
    }

    pub fn calls(&self) -> Vec<(ProcessorType, PaymentRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, processor: ProcessorType) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == processor)
            .count()
    }
}

#[async_trait]
impl ProcessorClient for FakeProcessors {
    async fn probe_health(
        &self,
        processor: ProcessorType,
    ) -> Result<ProcessorHealth, ProcessorError> {
        Ok(match processor {
            ProcessorType::Default => *self.default_health.lock().unwrap(),
            ProcessorType::Fallback => *self.fallback_health.lock().unwrap(),
        })
    }

    async fn submit_payment(
        &self,
        processor: ProcessorType,
        request: &PaymentRequest,
    ) -> Result<SubmitOutcome, ProcessorError> {
        self.calls.lock().unwrap().push((processor, request.clone()));

        let behavior = match processor {
            ProcessorType::Default => *self.default.lock().unwrap(),
            ProcessorType::Fallback => *self.fallback.lock().unwrap(),
        };
        match behavior {
            Behavior::Accept => Ok(SubmitOutcome::Accepted),
            Behavior::Reject => Ok(SubmitOutcome::Unprocessable),
            Behavior::Fail => Err(ProcessorError::Unavailable(500)),
        }
    }
}

/// Records in a vector; statistics are whatever the test pins.
pub struct MemoryStore {
    records: Mutex<Vec<PaymentRecord>>,
    statistics: Mutex<AmountStatistics>,
    broken: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            statistics: Mutex::new(AmountStatistics {
                count: 0,
                mean: None,
                stddev_sample: None,
            }),
            broken: AtomicBool::new(false),
        }
    }

    pub fn with_statistics(statistics: AmountStatistics) -> Self {
        let store = Self::new();
        *store.statistics.lock().unwrap() = statistics;
        store
    }

    pub fn break_down(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<PaymentRecord> {
        self.records.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Pool(deadpool_postgres::PoolError::Closed));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert(&self, record: &PaymentRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn summary(
        &self,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<PaymentsSummary, StoreError> {
        self.check()?;
        let mut summary = PaymentsSummary::default();
        for record in self.records.lock().unwrap().iter() {
            if from.is_some_and(|from| record.completed_at < from) {
                continue;
            }
            if to.is_some_and(|to| record.completed_at > to) {
                continue;
            }
            let entry = summary.processor_mut(record.processor);
            entry.total_requests += 1;
            entry.total_amount += record.amount;
        }
        Ok(summary)
    }

    async fn purge_all(&self) -> Result<(), StoreError> {
        self.check()?;
        self.records.lock().unwrap().clear();
        Ok(())
    }
}

#[async_trait]
impl StatisticsProvider for MemoryStore {
    async fn aggregate(&self) -> Result<AmountStatistics, StoreError> {
        self.check()?;
        Ok(*self.statistics.lock().unwrap())
    }
}

/// Small, fast pipeline with polling off so execution outcomes drive health.
pub fn fast_config() -> PipelineConfig {
    let queue = QueueConfig { buffer: 64, workers: 4 };
    PipelineConfig {
        screening: queue,
        high_priority: queue,
        low_priority: queue,
        waiting_room: queue,
        health_check_enabled: false,
        health_check_interval: Duration::from_millis(10),
        health_check_timeout: Duration::from_millis(100),
        max_acceptable_response_time: 50,
        threshold_interval: Duration::from_millis(10),
        k_factor: rust_decimal::Decimal::ONE,
        split_policy: SplitPolicy::CostThreshold,
        waiting_room_delay: Duration::from_millis(10),
        sweep_interval: Duration::from_millis(5),
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
