//! ioworker - queue-pair IO worker engine for block storage testing
//!
//! Drives a configurable workload through one submission/completion queue
//! pair of an NVMe-style controller, verifies data integrity end to end, and
//! reports per-second and per-latency accounting.
//!
//! # Architecture
//!
//! - **Driver seam**: [`driver::Controller`] and [`driver::QueuePair`] traits,
//!   with a software controller in [`driver::sim`] for tests
//! - **Workload generation**: random or sequential addressing, weighted sizes
//!   and per-section address weights
//! - **Data integrity**: LBA-stamped, checksummed blocks tracked per namespace
//! - **Diagnostics**: a fixed-size command ring log per queue
//! - **Accounting**: IOPS limiting, per-second counters, latency buckets
//!
//! # Example
//!
//! ```
//! use ioworker::config::{DriverConfig, EngineOptions, StopCondition, WorkloadSpec};
//! use ioworker::driver::sim::SimController;
//! use ioworker::driver::{Controller, Namespace};
//! use ioworker::IoWorker;
//! use std::sync::Arc;
//!
//! let ctrl = Arc::new(SimController::new(512, 1 << 16));
//! let ns = Namespace::open(ctrl.clone(), 1).unwrap();
//! let mut queue = ctrl.create_queue(0, 64).unwrap();
//!
//! let spec = WorkloadSpec::new(0..(1 << 16), StopCondition::io_count(100));
//! let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());
//! let result = worker.run(&ns, queue.as_mut(), &spec).unwrap();
//! assert_eq!(result.io_count(), 100);
//! ```

pub mod cmdlog;
pub mod config;
pub mod distribution;
pub mod driver;
pub mod error;
pub mod generator;
pub mod integrity;
pub mod logging;
pub mod stats;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use cmdlog::{CommandLog, CommandLogEntry, RingLog};
pub use config::{DriverConfig, EngineOptions, RunConfig, WorkloadSpec};
pub use driver::Namespace;
pub use error::{ErrorKind, WorkerError};
pub use worker::{run_parallel, IoWorker, StopSignal, WorkerResult};

/// Result type used throughout ioworker
pub type Result<T> = anyhow::Result<T>;
