pub mod align;
pub mod backfill;
pub mod config;
pub mod fetch;
pub mod household;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod pricing;
pub mod runner;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use pipeline::{Envelope, Pipeline, PipelineError, RunSummary};
pub use runner::Reconciler;
