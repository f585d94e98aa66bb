//! # bench-core
//!
//! Concurrent publish/subscribe benchmark engine. A run opens one shared
//! connection through a [`Transport`], drives `parallel` independent
//! [`Worker`] state machines over it and samples the shared [`Counters`]
//! until the message budget is spent or the run is interrupted.
#![warn(rust_2018_idioms, non_snake_case, non_upper_case_globals)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
pub use anyhow;
pub use config;
pub use tokio;
pub use tracing;

pub use crate::{
    counters::Counters,
    driver::{Driver, DriverExit},
    engine::{run, run_with_transport},
    lifecycle::ConnectionHandler,
    report::{BenchReport, RunOutcome},
    retry::RetryPolicy,
    transport::{Context, ConnectionListener, Subscriber, Transport, TransportError},
    worker::{Worker, WorkerError, WorkerExit, WorkerState},
};

pub mod counters;
pub mod driver;
pub mod engine;
pub mod lifecycle;
pub mod message;
pub mod report;
pub mod retry;
pub mod trace;
pub mod transport;
pub mod worker;
