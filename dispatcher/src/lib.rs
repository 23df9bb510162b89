pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod health_monitor;
pub mod http;
pub mod lifecycle;
pub mod message;
pub mod pipeline;
pub mod processor_client;
pub mod processor_type;
pub mod queue;
pub mod screening;
pub mod store;
pub mod sweeper;
pub mod threshold;
pub mod ticker;
pub mod waiting_room;
