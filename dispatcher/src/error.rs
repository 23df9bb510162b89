use thiserror::Error;

use crate::processor_type::ProcessorType;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {0} already has consumers")]
    AlreadyConsumed(&'static str),
    #[error("queue {0} needs at least one worker")]
    NoWorkers(&'static str),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("processor is unreachable: {0}")]
    Transport(String),
    #[error("processor timed out")]
    Timeout,
    #[error("processor answered with status {0}")]
    Unavailable(u16),
    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to get a client from the pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
}

/// Failure of a single queue handler invocation. Logged by the queue.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{processor} processor failed: {source}")]
    Processor {
        processor: ProcessorType,
        #[source]
        source: ProcessorError,
    },
    #[error("failed to persist payment: {0}")]
    Store(#[from] StoreError),
    #[error("queue {0} is closed")]
    QueueClosed(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
