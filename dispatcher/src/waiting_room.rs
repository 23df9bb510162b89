use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::message::Message;
use crate::queue::{Handler, SendOutcome, WorkQueue};

/// Delays a message, bumps its reprocess count and hands it back to
/// screening. This is the only edge that feeds the intake queue besides
/// HTTP intake itself.
pub struct WaitingRoom {
    screening: Arc<WorkQueue<Message>>,
    delay: Duration,
}

impl WaitingRoom {
    pub fn new(screening: Arc<WorkQueue<Message>>, delay: Duration) -> Self {
        Self { screening, delay }
    }
}

#[async_trait]
impl Handler<Message> for WaitingRoom {
    async fn handle(&self, mut msg: Message) -> Result<(), DispatchError> {
        tokio::time::sleep(self.delay).await;

        msg.reprocess_count = msg.reprocess_count.saturating_add(1);
        tracing::debug!(
            item_id = %msg.id,
            correlation_id = %msg.correlation_id,
            reprocess_count = msg.reprocess_count,
            "Resubmitting message to screening"
        );

        match self.screening.send(msg) {
            SendOutcome::Closed => Err(DispatchError::QueueClosed(self.screening.name())),
            SendOutcome::Queued | SendOutcome::Overflowed => Ok(()),
        }
    }
}
