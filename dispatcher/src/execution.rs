use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::cache::HealthCache;
use crate::error::DispatchError;
use crate::message::Message;
use crate::processor_client::{PaymentRequest, ProcessorClient, SubmitOutcome};
use crate::processor_type::ProcessorType;
use crate::queue::{Handler, SendOutcome, WorkQueue};
use crate::store::{PaymentRecord, PaymentRepository};

/// Executes messages against one processor.
///
/// With `live_health` set, every outcome also feeds the health cache: a
/// transient failure marks the processor failing, any definitive answer
/// clears it. Otherwise the cache belongs to the health monitor.
pub struct ExecutionWorker {
    processor: ProcessorType,
    client: Arc<dyn ProcessorClient>,
    healths: Arc<HealthCache>,
    store: Arc<dyn PaymentRepository>,
    waiting_room: Arc<WorkQueue<Message>>,
    live_health: bool,
}

impl ExecutionWorker {
    pub fn new(
        processor: ProcessorType,
        client: Arc<dyn ProcessorClient>,
        healths: Arc<HealthCache>,
        store: Arc<dyn PaymentRepository>,
        waiting_room: Arc<WorkQueue<Message>>,
        live_health: bool,
    ) -> Self {
        Self {
            processor,
            client,
            healths,
            store,
            waiting_room,
            live_health,
        }
    }

    fn observe_health(&self, failing: bool) {
        if self.live_health {
            self.healths.set_failing(self.processor, failing);
        }
    }
}

#[async_trait]
impl Handler<Message> for ExecutionWorker {
    async fn handle(&self, msg: Message) -> Result<(), DispatchError> {
        let request = PaymentRequest {
            correlation_id: msg.correlation_id,
            amount: msg.amount,
            requested_at: OffsetDateTime::now_utc(),
        };

        match self.client.submit_payment(self.processor, &request).await {
            Ok(SubmitOutcome::Accepted) => {
                self.observe_health(false);

                let record = PaymentRecord {
                    correlation_id: msg.correlation_id,
                    amount: msg.amount,
                    processor: self.processor,
                    completed_at: OffsetDateTime::now_utc(),
                };
                self.store.insert(&record).await?;

                tracing::debug!(
                    processor = %self.processor,
                    item_id = %msg.id,
                    "Payment processed"
                );
                Ok(())
            }
            Ok(SubmitOutcome::Unprocessable) => {
                self.observe_health(false);
                tracing::info!(
                    processor = %self.processor,
                    item_id = %msg.id,
                    correlation_id = %msg.correlation_id,
                    "Payment rejected as unprocessable, dropping"
                );
                Ok(())
            }
            Err(source) => {
                self.observe_health(true);

                let id = msg.id;
                if self.waiting_room.send(msg) == SendOutcome::Closed {
                    tracing::warn!(
                        processor = %self.processor,
                        item_id = %id,
                        "Waiting room closed, payment lost"
                    );
                }

                Err(DispatchError::Processor {
                    processor: self.processor,
                    source,
                })
            }
        }
    }
}
