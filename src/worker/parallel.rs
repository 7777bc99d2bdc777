//! Multi-queue runner
//!
//! Creates one queue pair per workload, runs one [`IoWorker`] per queue on its
//! own scoped thread, and collects results and command logs once every worker
//! has terminated. Workers share only the namespace (and through it the
//! integrity records), the driver flags and the stop signal.

use super::{IoWorker, StopSignal, WorkerResult};
use crate::cmdlog::RingLog;
use crate::config::validator::validate_spec;
use crate::config::{DriverConfig, EngineOptions, WorkloadSpec};
use crate::driver::{Namespace, QueueId, QueuePair};
use crate::error::{WorkerError, WorkerResultOf};
use anyhow::Context;
use tracing::{info, warn};

/// Per-queue results of a parallel run
#[derive(Debug)]
pub struct ParallelOutcome {
    /// In workload order
    pub results: Vec<(QueueId, WorkerResultOf<WorkerResult>)>,
    /// Command log of every queue that ran
    pub ring_log: RingLog,
}

impl ParallelOutcome {
    /// Completed IOs summed over all queues that produced a result
    pub fn total_io_count(&self) -> u64 {
        self.results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(WorkerResult::io_count)
            .sum()
    }

    /// True when every queue finished cleanly
    pub fn is_success(&self) -> bool {
        self.results
            .iter()
            .all(|(_, r)| r.as_ref().is_ok_and(WorkerResult::is_success))
    }
}

/// Run every workload on its own queue at the same time
///
/// All workloads are validated before any queue is created, so a bad workload
/// fails the whole run with `Config` without issuing a command.
///
/// # Errors
///
/// `Config` for an invalid workload, `Driver` when a queue cannot be created
/// or destroyed or a worker thread panics.
pub fn run_parallel(
    ns: &Namespace,
    specs: &[WorkloadSpec],
    driver: DriverConfig,
    options: &EngineOptions,
    stop: &StopSignal,
) -> WorkerResultOf<ParallelOutcome> {
    for (i, spec) in specs.iter().enumerate() {
        validate_spec(spec, options).map_err(|e| match e {
            WorkerError::Config(msg) => WorkerError::config(format!("workload {}: {}", i, msg)),
            other => other,
        })?;
    }

    let controller = ns.controller();
    let mut queues: Vec<Box<dyn QueuePair>> = Vec::with_capacity(specs.len());
    for spec in specs {
        match controller.create_queue(0, spec.qdepth) {
            Ok(queue) => queues.push(queue),
            Err(e) => {
                for queue in queues {
                    let _ = controller.destroy_queue(queue);
                }
                return Err(e.context("Failed to create queue").into());
            }
        }
    }
    info!(queues = queues.len(), nsid = ns.nsid(), "starting parallel run");

    let finished = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = queues
            .into_iter()
            .zip(specs)
            .map(|(mut queue, spec)| {
                let stop = stop.clone();
                let options = options.clone();
                scope.spawn(move |_| {
                    let mut worker = IoWorker::new(driver, options).with_stop_signal(stop);
                    let result = worker.run(ns, queue.as_mut(), spec);
                    (queue, result, worker.into_command_log())
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    })
    .map_err(|_| anyhow::anyhow!("worker scope panicked"))?;

    let mut results = Vec::with_capacity(finished.len());
    let mut ring_log = RingLog::with_capacity(options.cmdlog_capacity);
    let mut panicked = 0;
    let mut teardown: WorkerResultOf<()> = Ok(());

    for joined in finished {
        let Ok((queue, result, log)) = joined else {
            panicked += 1;
            continue;
        };
        let qid = queue.id();
        if let Err(e) = &result {
            warn!(queue = qid, error = %e, "worker failed");
        }
        ring_log.insert(qid, log);
        results.push((qid, result));

        if let Err(e) = controller
            .destroy_queue(queue)
            .with_context(|| format!("Failed to destroy queue {}", qid))
        {
            teardown = Err(e.into());
        }
    }

    if panicked > 0 {
        return Err(anyhow::anyhow!("{} worker thread(s) panicked", panicked).into());
    }
    teardown?;

    Ok(ParallelOutcome { results, ring_log })
}
