pub mod pipeline;
pub mod config;
pub mod sources;
pub mod sinks;
pub mod transform;
pub mod collector;
pub mod dashboard;
pub mod observability;
pub mod metrics_server;

pub use collector::{collect, CollectReport};
pub use pipeline::{Envelope, Pipeline, PipelineError};
