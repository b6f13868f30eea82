pub mod api;
pub mod config;
pub mod intake;
pub mod metrics_server;
pub mod observability;
pub mod queue;
pub mod transform;
pub mod worker;
pub mod writer;
