use std::sync::Arc;
use std::time::Duration;

use crate::cache::HealthCache;
use crate::error::ProcessorError;
use crate::processor_client::{ProcessorClient, ProcessorHealth};
use crate::processor_type::ProcessorType;

/// Probes both processors out of band and publishes their health.
pub struct HealthMonitor {
    client: Arc<dyn ProcessorClient>,
    healths: Arc<HealthCache>,
    max_acceptable_response_time: u64,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<dyn ProcessorClient>,
        healths: Arc<HealthCache>,
        max_acceptable_response_time: u64,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            client,
            healths,
            max_acceptable_response_time,
            probe_timeout,
        }
    }

    /// One polling round. Both probes run concurrently; a probe that errors
    /// leaves its processor's flag untouched.
    pub async fn refresh(&self) {
        let (default, fallback) = tokio::join!(
            self.probe(ProcessorType::Default),
            self.probe(ProcessorType::Fallback)
        );

        self.try_update_health(ProcessorType::Default, default);
        self.try_update_health(ProcessorType::Fallback, fallback);
    }

    async fn probe(&self, processor: ProcessorType) -> Result<ProcessorHealth, ProcessorError> {
        tokio::time::timeout(self.probe_timeout, self.client.probe_health(processor))
            .await
            .map_err(|_| ProcessorError::Timeout)?
    }

    fn try_update_health(
        &self,
        processor: ProcessorType,
        probed: Result<ProcessorHealth, ProcessorError>,
    ) {
        match probed {
            Ok(health) => {
                let failing = self.is_failing(&health);
                self.healths.set_failing(processor, failing);
                tracing::info!(
                    processor = %processor,
                    health = ?health,
                    failing,
                    "Updated health for processor"
                );
            }
            Err(err) => {
                tracing::warn!(
                    processor = %processor,
                    error = %err,
                    "Failed to probe processor health, keeping previous state"
                );
            }
        }
    }

    fn is_failing(&self, health: &ProcessorHealth) -> bool {
        health.failing || health.min_response_time > self.max_acceptable_response_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor_client::{PaymentRequest, SubmitOutcome};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedProbes {
        default: Mutex<Option<Result<ProcessorHealth, ProcessorError>>>,
        fallback: Mutex<Option<Result<ProcessorHealth, ProcessorError>>>,
    }

    impl ScriptedProbes {
        fn new(
            default: Result<ProcessorHealth, ProcessorError>,
            fallback: Result<ProcessorHealth, ProcessorError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                default: Mutex::new(Some(default)),
                fallback: Mutex::new(Some(fallback)),
            })
        }
    }

    #[async_trait]
    impl ProcessorClient for ScriptedProbes {
        async fn probe_health(
            &self,
            processor: ProcessorType,
        ) -> Result<ProcessorHealth, ProcessorError> {
            let slot = match processor {
                ProcessorType::Default => &self.default,
                ProcessorType::Fallback => &self.fallback,
            };
            slot.lock().unwrap().take().unwrap_or(Err(ProcessorError::Timeout))
        }

        async fn submit_payment(
            &self,
            _processor: ProcessorType,
            _request: &PaymentRequest,
        ) -> Result<SubmitOutcome, ProcessorError> {
            unreachable!("health monitor never submits payments")
        }
    }

    fn healthy(min_response_time: u64) -> Result<ProcessorHealth, ProcessorError> {
        Ok(ProcessorHealth {
            failing: false,
            min_response_time,
        })
    }

    fn monitor(client: Arc<ScriptedProbes>, healths: Arc<HealthCache>) -> HealthMonitor {
        HealthMonitor::new(client, healths, 50, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn failing_flag_and_slow_responses_mark_processor_failing() {
        let healths = Arc::new(HealthCache::new());
        let client = ScriptedProbes::new(
            Ok(ProcessorHealth {
                failing: true,
                min_response_time: 0,
            }),
            healthy(51),
        );

        monitor(client, Arc::clone(&healths)).refresh().await;

        assert!(healths.is_failing(ProcessorType::Default));
        assert!(healths.is_failing(ProcessorType::Fallback));
    }

    #[tokio::test]
    async fn healthy_probes_clear_flags() {
        let healths = Arc::new(HealthCache::new());
        healths.set_failing(ProcessorType::Default, true);
        healths.set_failing(ProcessorType::Fallback, true);

        let client = ScriptedProbes::new(healthy(10), healthy(50));
        monitor(client, Arc::clone(&healths)).refresh().await;

        assert!(!healths.is_failing(ProcessorType::Default));
        assert!(!healths.is_failing(ProcessorType::Fallback));
    }

    #[tokio::test]
    async fn probe_error_keeps_previous_flag() {
        let healths = Arc::new(HealthCache::new());
        healths.set_failing(ProcessorType::Default, true);

        let client = ScriptedProbes::new(
            Err(ProcessorError::Transport("connection refused".into())),
            healthy(5),
        );
        monitor(client, Arc::clone(&healths)).refresh().await;

        assert!(healths.is_failing(ProcessorType::Default));
        assert!(!healths.is_failing(ProcessorType::Fallback));
    }

    #[tokio::test]
    async fn probe_error_does_not_mark_healthy_processor_failing() {
        let healths = Arc::new(HealthCache::new());

        let client = ScriptedProbes::new(healthy(5), Err(ProcessorError::Unavailable(500)));
        monitor(client, Arc::clone(&healths)).refresh().await;

        assert!(!healths.is_failing(ProcessorType::Fallback));
    }

    /// Never answers a health check.
    struct Unresponsive;

    #[async_trait]
    impl ProcessorClient for Unresponsive {
        async fn probe_health(
            &self,
            _processor: ProcessorType,
        ) -> Result<ProcessorHealth, ProcessorError> {
            std::future::pending().await
        }

        async fn submit_payment(
            &self,
            _processor: ProcessorType,
            _request: &PaymentRequest,
        ) -> Result<SubmitOutcome, ProcessorError> {
            unreachable!("health monitor never submits payments")
        }
    }

    #[tokio::test]
    async fn hanging_health_check_keeps_previous_flags() {
        let healths = Arc::new(HealthCache::new());
        healths.set_failing(ProcessorType::Default, true);

        let monitor = HealthMonitor::new(
            Arc::new(Unresponsive),
            Arc::clone(&healths),
            50,
            Duration::from_millis(50),
        );
        tokio::time::timeout(Duration::from_secs(1), monitor.refresh())
            .await
            .expect("refresh should give up on a silent processor");

        assert!(healths.is_failing(ProcessorType::Default));
        assert!(!healths.is_failing(ProcessorType::Fallback));
    }
}
