//! Dispatcher service: admits jobs, publishes them to the broker, and owns the
//! job lifecycle. Workers use [`WorkerLoop`] or the transition API directly.

mod config;
mod service;
mod status;
mod worker;

pub use config::DispatcherConfig;
pub use display_types::*;
pub use service::{Claim, Dispatcher};
pub use status::{StatusAggregator, DEFAULT_FAILURES_LIMIT};
pub use worker::{CancelProbe, HandlerError, JobHandler, Processed, WorkerLoop};
