use std::sync::Arc;

use crate::queue::Sweepable;

/// Moves overflowed messages back into their queue's primary buffer.
pub struct FallbackSweeper {
    queues: Vec<Arc<dyn Sweepable>>,
}

impl FallbackSweeper {
    pub fn new(queues: Vec<Arc<dyn Sweepable>>) -> Self {
        Self { queues }
    }

    /// One pass over every queue; queues with an empty overflow buffer are
    /// skipped. Returns the total number of messages moved.
    pub fn sweep(&self) -> usize {
        let mut moved = 0;
        for queue in &self.queues {
            if queue.count_overflow() > 0 {
                moved += queue.retry_fallback();
            }
        }
        moved
    }
}
