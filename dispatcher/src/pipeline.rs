use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{CostThresholdCache, HealthCache};
use crate::config::PipelineConfig;
use crate::execution::ExecutionWorker;
use crate::health_monitor::HealthMonitor;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::message::Message;
use crate::processor_client::ProcessorClient;
use crate::processor_type::ProcessorType;
use crate::queue::{Handler, SendOutcome, Sweepable, WorkQueue};
use crate::screening::{ScreeningRouter, SplitPolicy};
use crate::store::{PaymentRepository, StatisticsProvider};
use crate::sweeper::FallbackSweeper;
use crate::threshold::ThresholdCalculator;
use crate::ticker::{PeriodicTask, run_periodic};
use crate::waiting_room::WaitingRoom;

/// The four queues messages move between.
pub struct QueueGraph {
    pub screening: Arc<WorkQueue<Message>>,
    pub high_priority: Arc<WorkQueue<Message>>,
    pub low_priority: Arc<WorkQueue<Message>>,
    pub waiting_room: Arc<WorkQueue<Message>>,
}

impl QueueGraph {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            screening: Arc::new(WorkQueue::new("screening", config.screening.buffer)),
            high_priority: Arc::new(WorkQueue::new("high_priority", config.high_priority.buffer)),
            low_priority: Arc::new(WorkQueue::new("low_priority", config.low_priority.buffer)),
            waiting_room: Arc::new(WorkQueue::new("waiting_room", config.waiting_room.buffer)),
        }
    }

    pub fn sweepables(&self) -> Vec<Arc<dyn Sweepable>> {
        vec![
            Arc::clone(&self.screening) as Arc<dyn Sweepable>,
            Arc::clone(&self.high_priority) as Arc<dyn Sweepable>,
            Arc::clone(&self.low_priority) as Arc<dyn Sweepable>,
            Arc::clone(&self.waiting_room) as Arc<dyn Sweepable>,
        ]
    }

    /// Overflow sizes in graph order, for diagnostics.
    pub fn overflow_counts(&self) -> [(&'static str, usize); 4] {
        [
            (self.screening.name(), self.screening.count_overflow()),
            (self.high_priority.name(), self.high_priority.count_overflow()),
            (self.low_priority.name(), self.low_priority.count_overflow()),
            (self.waiting_room.name(), self.waiting_room.count_overflow()),
        ]
    }
}

/// Owns the running queue graph: consumers for every queue plus the
/// periodic health, threshold and sweep tasks.
///
/// Low priority executes against the default processor, high priority
/// against the fallback. Every task listens on the process-wide `shutdown`
/// handed to [`Dispatcher::start`].
pub struct Dispatcher {
    queues: QueueGraph,
    healths: Arc<HealthCache>,
    threshold: Arc<CostThresholdCache>,
    shutdown: Arc<Shutdown>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Builds the graph and spawns every consumer and periodic task. Must be
    /// called from within a tokio runtime.
    pub fn start(
        config: &PipelineConfig,
        client: Arc<dyn ProcessorClient>,
        store: Arc<dyn PaymentRepository>,
        stats: Arc<dyn StatisticsProvider>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        let queues = QueueGraph::new(config);
        let healths = Arc::new(HealthCache::new());
        let threshold = Arc::new(CostThresholdCache::new());
        let live_health = !config.health_check_enabled;

        let router = Arc::new(ScreeningRouter::new(
            Arc::clone(&healths),
            Arc::clone(&threshold),
            config.split_policy,
            Arc::clone(&queues.high_priority),
            Arc::clone(&queues.low_priority),
            Arc::clone(&queues.waiting_room),
        ));
        let executor = |processor| {
            Arc::new(ExecutionWorker::new(
                processor,
                Arc::clone(&client),
                Arc::clone(&healths),
                Arc::clone(&store),
                Arc::clone(&queues.waiting_room),
                live_health,
            ))
        };
        let default_executor = executor(ProcessorType::Default);
        let fallback_executor = executor(ProcessorType::Fallback);
        let waiting_room = Arc::new(WaitingRoom::new(
            Arc::clone(&queues.screening),
            config.waiting_room_delay,
        ));

        let mut tasks = vec![
            spawn_consumer(
                &queues.screening,
                config.screening.workers,
                router,
                shutdown.subscribe(),
            ),
            spawn_consumer(
                &queues.low_priority,
                config.low_priority.workers,
                default_executor,
                shutdown.subscribe(),
            ),
            spawn_consumer(
                &queues.high_priority,
                config.high_priority.workers,
                fallback_executor,
                shutdown.subscribe(),
            ),
            spawn_consumer(
                &queues.waiting_room,
                config.waiting_room.workers,
                waiting_room,
                shutdown.subscribe(),
            ),
        ];

        let sweeper = Arc::new(FallbackSweeper::new(queues.sweepables()));
        tasks.push(spawn_periodic(
            "fallback_sweeper",
            config.sweep_interval,
            shutdown.subscribe(),
            sweeper,
        ));

        if config.health_check_enabled {
            let monitor = Arc::new(HealthMonitor::new(
                Arc::clone(&client),
                Arc::clone(&healths),
                config.max_acceptable_response_time,
                config.health_check_timeout,
            ));
            tasks.push(spawn_periodic(
                "health_monitor",
                config.health_check_interval,
                shutdown.subscribe(),
                monitor,
            ));
        }

        if config.split_policy == SplitPolicy::CostThreshold {
            let calculator = Arc::new(ThresholdCalculator::new(
                stats,
                Arc::clone(&threshold),
                config.k_factor,
            ));
            tasks.push(spawn_periodic(
                "threshold_calculator",
                config.threshold_interval,
                shutdown.subscribe(),
                calculator,
            ));
        }

        tracing::info!(
            split_policy = %config.split_policy,
            health_check_enabled = config.health_check_enabled,
            "Dispatcher started"
        );

        Self {
            queues,
            healths,
            threshold,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    /// Accepts a payment into the screening queue.
    pub fn submit(&self, correlation_id: Uuid, amount: Decimal) -> SendOutcome {
        let msg = Message::new(correlation_id, amount, OffsetDateTime::now_utc());
        self.queues.screening.send(msg)
    }

    pub fn queues(&self) -> &QueueGraph {
        &self.queues
    }

    pub fn healths(&self) -> &Arc<HealthCache> {
        &self.healths
    }

    pub fn threshold(&self) -> &Arc<CostThresholdCache> {
        &self.threshold
    }

    /// Triggers the shared shutdown, if nobody has yet, and waits for
    /// in-flight work to finish. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();

        let tasks = std::mem::take(&mut *self.lock_tasks());
        for result in join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatcher task panicked");
            }
        }

        tracing::info!(overflow = ?self.queues.overflow_counts(), "Dispatcher stopped");
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_consumer<H>(
    queue: &Arc<WorkQueue<Message>>,
    workers: usize,
    handler: Arc<H>,
    signal: ShutdownSignal,
) -> JoinHandle<()>
where
    H: Handler<Message>,
{
    let queue = Arc::clone(queue);
    tokio::spawn(async move {
        if let Err(e) = queue.consume(signal, workers, handler).await {
            tracing::error!(queue = queue.name(), error = %e, "Consumer could not start");
        }
    })
}

fn spawn_periodic<P>(
    name: &'static str,
    period: Duration,
    signal: ShutdownSignal,
    task: Arc<P>,
) -> JoinHandle<()>
where
    P: PeriodicTask,
{
    tokio::spawn(run_periodic(name, period, signal, task))
}
