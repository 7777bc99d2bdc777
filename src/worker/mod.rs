//! IO worker engine
//!
//! One `IoWorker` drives one queue pair. It keeps the queue filled up to the
//! workload's depth, polls for completions, and folds every completion into
//! accounting, integrity records and the command log.
//!
//! # State machine
//!
//! ```text
//! Idle ──run()──> Running ──stop condition / StopSignal──> Draining ─────────┐
//!                    │                                          │              ├──> Terminated
//!                    │                                    drain timeout        │
//!                    │                                          v              │
//!                    └──failed submit / first error (iow_term)──> Stopping ────┘
//! ```
//!
//! Draining and Stopping both stop issuing and wait for outstanding commands,
//! bounded by `max(drain_floor, qdepth × worst_case_latency)`. Commands still
//! outstanding when that expires are reported as unresolved and the worker
//! terminates through Stopping.
//!
//! Only commands the queue accepted are written to the command log. An entry
//! about to be overwritten while its command is still in flight is moved to
//! the tail of the log first.
//!
//! # Buffers and tags
//!
//! The buffer pool holds one buffer per queue slot. A command's tag is the pool
//! slot index of its buffer, and the in-flight table is indexed by the same
//! slot, so matching a completion is a single array access.

pub mod parallel;
pub mod result;

pub use parallel::{run_parallel, ParallelOutcome};
pub use result::WorkerResult;

use crate::cmdlog::{CommandId, CommandLog, CommandLogEntry};
use crate::config::validator::validate_spec;
use crate::config::{DriverConfig, EngineOptions, WorkloadSpec};
use crate::driver::{Command, CommandStatus, Completion, Direction, IoFlags, Namespace, QueueId, QueuePair};
use crate::error::{ErrorKind, WorkerError, WorkerResultOf, STATUS_DATA_CORRUPTION, STATUS_SUBMIT_FAILED};
use crate::generator::Generator;
use crate::integrity;
use crate::stats::rate::RateLimiter;
use crate::stats::Accounting;
use crate::util::buffer::BufferPool;
use crate::util::fast_time::FastInstant;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    /// Stop condition reached; waiting for outstanding commands
    Draining,
    /// Aborting after a failure; waiting for outstanding commands
    Stopping,
    Terminated,
}

/// Cooperative cancellation shared between a controller thread and workers
///
/// Checked once per loop iteration; a stopped worker drains and terminates.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A submitted command waiting for its completion
#[derive(Debug)]
struct InFlight {
    log_id: CommandId,
    lba: u64,
    blocks: u32,
    direction: Direction,
    submitted: FastInstant,
}

/// Engine driving one queue pair
pub struct IoWorker {
    driver: DriverConfig,
    options: EngineOptions,
    stop: StopSignal,
    state: WorkerState,
    log: CommandLog,
    queue_id: Option<QueueId>,
    /// States visited by the last run, in order
    trace: Vec<WorkerState>,
}

impl IoWorker {
    pub fn new(driver: DriverConfig, options: EngineOptions) -> Self {
        let log = CommandLog::with_capacity(options.cmdlog_capacity.max(2));
        Self {
            driver,
            options,
            stop: StopSignal::new(),
            state: WorkerState::Idle,
            log,
            queue_id: None,
            trace: vec![WorkerState::Idle],
        }
    }

    /// Share a cancellation flag with other workers or a controlling thread
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Every state the last run went through, starting with `Idle`
    pub fn state_trace(&self) -> &[WorkerState] {
        &self.trace
    }

    /// Queue driven by the last run
    pub fn queue_id(&self) -> Option<QueueId> {
        self.queue_id
    }

    pub fn command_log(&self) -> &CommandLog {
        &self.log
    }

    /// Most recent `n` commands of the last run, oldest first
    pub fn dump(&self, n: usize) -> Vec<CommandLogEntry> {
        self.log.dump(n)
    }

    pub fn into_command_log(self) -> CommandLog {
        self.log
    }

    fn transition(&mut self, next: WorkerState) {
        if self.state != next {
            debug!(queue = ?self.queue_id, from = ?self.state, to = ?next, "worker state change");
            self.state = next;
            self.trace.push(next);
        }
    }

    /// Run `spec` on `queue` until its stop condition, then drain
    ///
    /// # Errors
    ///
    /// - `Config` when the workload is invalid; no command has been issued
    /// - `Driver` when the queue pair fails to poll or allocate buffers
    ///
    /// Command failures, corruptions and an incomplete drain are *not* errors
    /// here; they are recorded in the returned `WorkerResult`. Use
    /// [`WorkerResult::into_result`] to treat them as errors.
    pub fn run(
        &mut self,
        ns: &Namespace,
        queue: &mut dyn QueuePair,
        spec: &WorkloadSpec,
    ) -> WorkerResultOf<WorkerResult> {
        self.state = WorkerState::Idle;
        self.trace.clear();
        self.trace.push(WorkerState::Idle);
        self.queue_id = Some(queue.id());

        validate_spec(spec, &self.options)?;
        if spec.region_end > ns.num_sectors() {
            return Err(WorkerError::config(format!(
                "region_end ({}) is past the end of namespace {} ({} sectors)",
                spec.region_end,
                ns.nsid(),
                ns.num_sectors()
            )));
        }
        if spec.qdepth > queue.depth() {
            return Err(WorkerError::config(format!(
                "qdepth ({}) exceeds the depth of queue {} ({})",
                spec.qdepth,
                queue.id(),
                queue.depth()
            )));
        }

        let mut generator = Generator::new(spec)?;
        let sector_size = ns.sector_size();
        let buffer_bytes = spec.max_transfer_blocks() as usize * sector_size;
        let mut pool = BufferPool::allocate(spec.qdepth, buffer_bytes, |bytes| ns.alloc_buffer(bytes))?;

        let tracked_seconds = spec
            .stop
            .seconds
            .map_or(self.options.max_tracked_seconds as usize, |s| s as usize + 1);
        let mut acct = Accounting::new(tracked_seconds, &self.options);
        let mut limiter = RateLimiter::new(spec.iops);
        let mut in_flight: Vec<Option<InFlight>> = (0..spec.qdepth).map(|_| None).collect();
        let mut outstanding = 0usize;
        self.log = CommandLog::with_capacity(self.options.cmdlog_capacity);

        let drain_timeout = self.options.drain_timeout(spec.qdepth);
        let poll_wait = self.options.poll_wait();

        info!(
            queue = queue.id(),
            qdepth = spec.qdepth,
            region_start = spec.region_start,
            region_end = spec.region_end,
            read_percentage = spec.read_percentage,
            iops = spec.iops,
            seed = generator.seed(),
            "worker starting"
        );
        self.transition(WorkerState::Running);

        let start = FastInstant::now();
        let time_limit = spec.stop.seconds.map(|s| start + Duration::from_secs(s as u64));
        let stop_reached = |issued: u64, now: FastInstant| {
            spec.stop.io_count.is_some_and(|n| issued >= n) || time_limit.is_some_and(|t| now >= t)
        };
        let mut drain_deadline: Option<FastInstant> = None;
        let mut unresolved = Vec::new();

        loop {
            let now = FastInstant::now();

            if self.state == WorkerState::Running {
                if self.stop.is_stopped() {
                    info!(queue = queue.id(), "stop requested");
                    self.transition(WorkerState::Draining);
                } else if stop_reached(generator.issued(), now) {
                    self.transition(WorkerState::Draining);
                }
            }
            if self.state != WorkerState::Running && drain_deadline.is_none() {
                drain_deadline = Some(now + drain_timeout);
            }

            // Phase 1: fill the queue
            while self.state == WorkerState::Running && outstanding < spec.qdepth {
                let now = FastInstant::now();
                if stop_reached(generator.issued(), now) || !limiter.ready(now) {
                    break;
                }
                let Some((slot, mut buffer)) = pool.take() else {
                    break;
                };

                let cmd = generator.next_command();
                let bytes = cmd.blocks as usize * sector_size;
                let flags = match cmd.direction {
                    Direction::Write => {
                        integrity::fill(&mut buffer.as_mut_slice()[..bytes], cmd.lba, &spec.pattern, sector_size);
                        if self.driver.fua_write { IoFlags::FUA } else { IoFlags::NONE }
                    }
                    Direction::Read => {
                        if self.driver.fua_read { IoFlags::FUA } else { IoFlags::NONE }
                    }
                };

                let command = Command {
                    tag: slot as u64,
                    direction: cmd.direction,
                    lba: cmd.lba,
                    blocks: cmd.blocks,
                    flags,
                    buffer,
                };

                match queue.submit(command) {
                    Ok(()) => {
                        self.keep_in_flight_logged(&mut in_flight);
                        let log_id = self.log.record_submit(CommandLogEntry::submitted(
                            cmd.lba,
                            cmd.blocks,
                            cmd.direction,
                            now.micros_since(start),
                        ));
                        in_flight[slot] = Some(InFlight {
                            log_id,
                            lba: cmd.lba,
                            blocks: cmd.blocks,
                            direction: cmd.direction,
                            submitted: now,
                        });
                        outstanding += 1;
                        limiter.on_submit(now);
                    }
                    Err(e) => {
                        // The buffer went down with the command; the pool is one short from here on.
                        // The device never saw it, so it stays out of the command log.
                        warn!(queue = queue.id(), lba = cmd.lba, error = %format!("{:#}", e), "submission failed");
                        acct.record_error(ErrorKind::Device, STATUS_SUBMIT_FAILED);
                        self.transition(WorkerState::Stopping);
                    }
                }
            }

            if outstanding == 0 {
                if self.state != WorkerState::Running {
                    break;
                }
                // Idle and throttled: sleep until the next slot, not past the time limit
                let now = FastInstant::now();
                let mut pause = limiter.wait_time(now);
                if let Some(limit) = time_limit {
                    pause = pause.min(limit.duration_since(now));
                }
                if !pause.is_zero() {
                    std::thread::sleep(pause);
                }
                continue;
            }

            // Phase 2: poll, never sleeping past the next thing we must act on
            let now = FastInstant::now();
            let mut wait = poll_wait;
            if self.state == WorkerState::Running {
                if limiter.is_throttled() && outstanding < spec.qdepth {
                    wait = wait.min(limiter.wait_time(now));
                }
                if let Some(limit) = time_limit {
                    wait = wait.min(limit.duration_since(now));
                }
            }
            if let Some(deadline) = drain_deadline {
                wait = wait.min(deadline.duration_since(now));
            }

            let completions = match queue.poll(outstanding, wait) {
                Ok(completions) => completions,
                Err(e) => {
                    error!(queue = queue.id(), error = %format!("{:#}", e), "poll failed");
                    self.transition(WorkerState::Terminated);
                    return Err(WorkerError::Driver(e.context(format!("Failed to poll queue {}", queue.id()))));
                }
            };

            for completion in completions {
                let slot = completion.tag as usize;
                let Some(op) = in_flight.get_mut(slot).and_then(Option::take) else {
                    self.transition(WorkerState::Terminated);
                    return Err(WorkerError::Driver(anyhow::anyhow!(
                        "completion for unknown tag {} on queue {}",
                        completion.tag,
                        queue.id()
                    )));
                };
                outstanding -= 1;

                let failed = self.complete(ns, op, &completion, start, &mut acct);
                pool.give_back(slot, completion.buffer);

                if failed && self.driver.iow_term && self.state != WorkerState::Stopping {
                    warn!(queue = queue.id(), "terminating on first error");
                    self.transition(WorkerState::Stopping);
                }
            }

            if let Some(deadline) = drain_deadline {
                if outstanding > 0 && FastInstant::now() >= deadline {
                    unresolved = self.unresolved(&in_flight, start);
                    error!(
                        queue = queue.id(),
                        unresolved = unresolved.len(),
                        timeout_ms = drain_timeout.as_millis() as u64,
                        "drain timed out"
                    );
                    self.transition(WorkerState::Stopping);
                    break;
                }
            }
        }

        let elapsed = start.elapsed();
        let (error, error_kind) = if unresolved.is_empty() {
            acct.first_error().map_or((0, None), |(kind, code)| (code, Some(kind)))
        } else {
            (crate::error::STATUS_INCOMPLETE_DRAIN, Some(ErrorKind::IncompleteDrain))
        };

        let result = WorkerResult {
            io_count_read: acct.io_count_read(),
            io_count_write: acct.io_count_write(),
            mseconds: elapsed.as_millis() as u64,
            latency_max_us: acct.latency_max_us(),
            error,
            error_kind,
            error_count: acct.error_count() + unresolved.len() as u64,
            corruptions: acct.corruptions().to_vec(),
            unresolved,
            io_counter_per_second: acct.per_second(elapsed),
            io_counter_per_latency: acct.per_latency(),
            latency_percentiles: acct.histogram().summary(),
            recent_commands: self.log.dump(spec.cmdlog_len),
            seed: generator.seed(),
        };

        self.transition(WorkerState::Terminated);
        info!(
            queue = queue.id(),
            reads = result.io_count_read,
            writes = result.io_count_write,
            errors = result.error_count,
            mseconds = result.mseconds,
            "worker finished"
        );
        Ok(result)
    }

    /// Account one completion; returns true if the command failed
    fn complete(
        &mut self,
        ns: &Namespace,
        op: InFlight,
        completion: &Completion,
        start: FastInstant,
        acct: &mut Accounting,
    ) -> bool {
        let now = FastInstant::now();
        let latency = now.duration_since(op.submitted);
        let bytes = op.blocks as usize * ns.sector_size();
        let data = &completion.buffer.as_slice()[..bytes];

        let mut status = completion.status.code();
        match completion.status {
            CommandStatus::Success => match op.direction {
                Direction::Write => {
                    ns.integrity().record_write(data, op.lba, op.blocks);
                    acct.record_success(op.direction, now.duration_since(start), latency);
                }
                Direction::Read if self.driver.verify_read => {
                    match ns.integrity().verify_read(data, op.lba, op.blocks, self.driver.strict_deallocate) {
                        Ok(()) => acct.record_success(op.direction, now.duration_since(start), latency),
                        Err(corruption) => {
                            error!(
                                lba = corruption.lba,
                                expected = corruption.expected,
                                observed = corruption.observed,
                                kind = ?corruption.kind,
                                "data corruption"
                            );
                            acct.record_corruption(corruption);
                            status = STATUS_DATA_CORRUPTION;
                        }
                    }
                }
                Direction::Read => acct.record_success(op.direction, now.duration_since(start), latency),
            },
            CommandStatus::TimedOut => {
                warn!(lba = op.lba, direction = %op.direction, "command timed out");
                acct.record_error(ErrorKind::Timeout, status);
            }
            CommandStatus::Error { sct, sc } => {
                warn!(lba = op.lba, direction = %op.direction, sct, sc, "command failed");
                acct.record_error(ErrorKind::Device, status);
            }
        }

        // A failed write leaves the range in an unknown state
        if completion.status.is_error() && op.direction == Direction::Write {
            ns.integrity().deallocate(op.lba, op.blocks as u64, true);
        }

        self.log.record_complete(op.log_id, now.micros_since(start), status);
        status != 0
    }

    /// Move in-flight entries out of the way of the next log write
    ///
    /// An entry about to drop out of the live window is re-recorded at the
    /// tail while its command is still outstanding, so every in-flight command
    /// keeps a live entry however long it is stuck.
    fn keep_in_flight_logged(&mut self, in_flight: &mut [Option<InFlight>]) {
        while let Some(oldest) = self.log.next_evicted() {
            if !self.log.get(oldest).is_some_and(CommandLogEntry::is_outstanding) {
                break;
            }
            let Some(op) = in_flight.iter_mut().flatten().find(|op| op.log_id == oldest) else {
                break;
            };
            match self.log.rerecord(oldest) {
                Some(id) => op.log_id = id,
                None => break,
            }
        }
    }

    /// Log entries of every command still in flight, oldest first
    fn unresolved(&self, in_flight: &[Option<InFlight>], start: FastInstant) -> Vec<CommandLogEntry> {
        let mut entries: Vec<CommandLogEntry> = in_flight
            .iter()
            .flatten()
            .map(|op| {
                self.log.get(op.log_id).cloned().unwrap_or_else(|| {
                    CommandLogEntry::submitted(op.lba, op.blocks, op.direction, op.submitted.micros_since(start))
                })
            })
            .collect();
        entries.sort_by_key(|e| e.submitted_us);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SizeWeight, StopCondition};
    use crate::driver::sim::{Fault, SimController};
    use crate::driver::Controller;

    fn setup(num_sectors: u64) -> (Arc<SimController>, Namespace) {
        let sim = Arc::new(SimController::new(512, num_sectors));
        let ns = Namespace::open(sim.clone(), 1).unwrap();
        (sim, ns)
    }

    fn spec(io_count: u64) -> WorkloadSpec {
        WorkloadSpec {
            qdepth: 4,
            seed: Some(11),
            ..WorkloadSpec::new(0..1000, StopCondition::io_count(io_count))
        }
    }

    fn verify_on() -> DriverConfig {
        DriverConfig {
            verify_read: true,
            ..DriverConfig::default()
        }
    }

    #[test]
    fn test_reads_only_run() {
        let (sim, ns) = setup(1000);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());
        assert_eq!(worker.state(), WorkerState::Idle);

        let result = worker.run(&ns, queue.as_mut(), &spec(100)).unwrap();
        assert_eq!(result.io_count_read, 100);
        assert_eq!(result.io_count_write, 0);
        assert_eq!(result.error, 0);
        assert!(result.is_success());
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(sim.submitted_count(), 100);
        assert_eq!(worker.command_log().total_recorded(), 100);
    }

    #[test]
    fn test_never_exceeds_qdepth() {
        let (sim, ns) = setup(1000);
        sim.set_latency(Duration::from_micros(200));
        // A queue of depth 4 rejects a fifth outstanding command
        let mut queue = sim.create_queue(0, 4).unwrap();
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());
        let result = worker.run(&ns, queue.as_mut(), &spec(200)).unwrap();
        assert!(result.is_success());
        assert_eq!(result.io_count(), 200);
    }

    #[test]
    fn test_config_error_before_any_command() {
        let (sim, ns) = setup(1000);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());

        let mut bad = spec(10);
        bad.region_end = bad.region_start;
        assert!(matches!(worker.run(&ns, queue.as_mut(), &bad), Err(WorkerError::Config(_))));

        let mut too_deep = spec(10);
        too_deep.qdepth = 8;
        assert!(matches!(worker.run(&ns, queue.as_mut(), &too_deep), Err(WorkerError::Config(_))));

        let mut past_end = spec(10);
        past_end.region_end = 2000;
        assert!(matches!(worker.run(&ns, queue.as_mut(), &past_end), Err(WorkerError::Config(_))));

        assert_eq!(sim.submitted_count(), 0);
    }

    #[test]
    fn test_write_then_verified_read() {
        let (sim, ns) = setup(256);
        let mut queue = sim.create_queue(0, 8).unwrap();
        let mut worker = IoWorker::new(verify_on(), EngineOptions::default());

        let mut write = spec(0);
        write.region_end = 256;
        write.random = false;
        write.read_percentage = 0;
        write.stop = StopCondition::io_count(32);
        let result = worker.run(&ns, queue.as_mut(), &write).unwrap();
        assert_eq!(result.io_count_write, 32);
        assert_eq!(ns.integrity().tracked_blocks(), 256);

        let read = WorkloadSpec { read_percentage: 100, stop: StopCondition::io_count(64), ..write };
        let result = worker.run(&ns, queue.as_mut(), &read).unwrap();
        assert_eq!(result.io_count_read, 64);
        assert!(result.is_success(), "{:?}", result.corruptions);
    }

    #[test]
    fn test_corrupted_read_reported() {
        let (sim, ns) = setup(64);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let mut worker = IoWorker::new(verify_on(), EngineOptions::default());

        let mut write = spec(8);
        write.region_end = 64;
        write.random = false;
        write.read_percentage = 0;
        write.cmdlog_len = 16;
        worker.run(&ns, queue.as_mut(), &write).unwrap();

        sim.inject_next(Direction::Read, Fault::CorruptRead);
        let read = WorkloadSpec { read_percentage: 100, ..write };
        let result = worker.run(&ns, queue.as_mut(), &read).unwrap();

        assert_eq!(result.error, STATUS_DATA_CORRUPTION);
        assert_eq!(result.error_kind, Some(ErrorKind::DataCorruption));
        assert_eq!(result.error_count, 1);
        assert_eq!(result.io_count_read, 7);
        let lba = result.corruptions[0].lba;
        assert!(worker.dump(16).iter().any(|e| e.covers(lba) && e.status == Some(STATUS_DATA_CORRUPTION)));
        assert!(matches!(result.into_result(), Err(WorkerError::DataCorruption { .. })));
    }

    #[test]
    fn test_device_error_counted_and_run_continues() {
        let (sim, ns) = setup(1000);
        sim.inject_nth(3, Fault::Status { sct: 0x02, sc: 0x81 });
        let mut queue = sim.create_queue(0, 4).unwrap();
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());

        let result = worker.run(&ns, queue.as_mut(), &spec(50)).unwrap();
        assert_eq!(result.error_count, 1);
        assert_eq!(result.error, 0x0281);
        assert_eq!(result.error_kind, Some(ErrorKind::Device));
        assert_eq!(result.io_count_read, 49);
    }

    #[test]
    fn test_iow_term_stops_on_first_error() {
        let (sim, ns) = setup(1000);
        sim.inject_nth(5, Fault::Timeout);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let driver = DriverConfig {
            iow_term: true,
            ..DriverConfig::default()
        };
        let mut worker = IoWorker::new(driver, EngineOptions::default());

        let result = worker.run(&ns, queue.as_mut(), &spec(10_000)).unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert!(result.io_count() < 20);
        assert!(matches!(result.into_result(), Err(WorkerError::Timeout { errors: 1 })));
    }

    #[test]
    fn test_dropped_command_times_out_drain() {
        let (sim, ns) = setup(1000);
        sim.inject_nth(2, Fault::Drop);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let options = EngineOptions {
            worst_case_latency_ms: 5,
            drain_floor_ms: 20,
            ..EngineOptions::default()
        };
        let mut worker = IoWorker::new(DriverConfig::default(), options);

        let result = worker.run(&ns, queue.as_mut(), &spec(20)).unwrap();
        assert_eq!(result.unresolved.len(), 1);
        assert!(result.unresolved[0].is_outstanding());
        assert_eq!(result.error_kind, Some(ErrorKind::IncompleteDrain));
        assert_eq!(result.io_count(), 19);
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(
            worker.state_trace(),
            &[
                WorkerState::Idle,
                WorkerState::Running,
                WorkerState::Draining,
                WorkerState::Stopping,
                WorkerState::Terminated,
            ]
        );
    }

    #[test]
    fn test_stuck_command_stays_in_log() {
        let (sim, ns) = setup(1000);
        sim.set_latency(Duration::from_micros(200));
        sim.inject_nth(40, Fault::Drop);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let options = EngineOptions {
            cmdlog_capacity: 16,
            worst_case_latency_ms: 5,
            drain_floor_ms: 20,
            ..EngineOptions::default()
        };
        let mut worker = IoWorker::new(DriverConfig::default(), options);

        let result = worker.run(&ns, queue.as_mut(), &spec(200)).unwrap();
        assert_eq!(result.unresolved.len(), 1);
        let stuck = &result.unresolved[0];
        assert_eq!(stuck.lba, sim.submitted_operations()[40].lba);
        // At least nine rounds of 200us completions came before it
        assert!(stuck.submitted_us >= 1_000, "submitted_us {}", stuck.submitted_us);
        assert_eq!(worker.command_log().outstanding(), vec![stuck.clone()]);
        assert!(worker.command_log().total_recorded() > 200);
    }

    /// Queue that refuses one submission
    struct RejectingQueue {
        inner: Box<dyn QueuePair>,
        reject_at: u64,
        seen: u64,
    }

    impl QueuePair for RejectingQueue {
        fn id(&self) -> QueueId {
            self.inner.id()
        }

        fn depth(&self) -> usize {
            self.inner.depth()
        }

        fn submit(&mut self, command: Command) -> crate::Result<()> {
            let n = self.seen;
            self.seen += 1;
            if n == self.reject_at {
                anyhow::bail!("controller rejected command");
            }
            self.inner.submit(command)
        }

        fn poll(&mut self, max_completions: usize, wait: Duration) -> crate::Result<Vec<Completion>> {
            self.inner.poll(max_completions, wait)
        }
    }

    #[test]
    fn test_rejected_submission_not_logged() {
        let (sim, ns) = setup(1000);
        let mut queue = RejectingQueue {
            inner: sim.create_queue(0, 4).unwrap(),
            reject_at: 5,
            seen: 0,
        };
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());

        let result = worker.run(&ns, &mut queue, &spec(50)).unwrap();
        assert_eq!(result.error, STATUS_SUBMIT_FAILED);
        assert_eq!(result.error_kind, Some(ErrorKind::Device));
        assert_eq!(result.io_count(), 5);
        assert!(worker.state_trace().contains(&WorkerState::Stopping));

        let log = worker.command_log();
        assert_eq!(log.total_recorded(), sim.submitted_count() as u64);
        assert!(log.dump(log.len()).iter().all(|e| e.status == Some(0)));
    }

    #[test]
    fn test_strict_deallocate_from_driver_config() {
        let (sim, ns) = setup(64);
        let mut queue = sim.create_queue(0, 4).unwrap();

        let mut write = spec(8);
        write.region_end = 64;
        write.random = false;
        write.read_percentage = 0;
        IoWorker::new(verify_on(), EngineOptions::default())
            .run(&ns, queue.as_mut(), &write)
            .unwrap();
        // Forget the records but leave the media untouched
        ns.clear_integrity(0, 64, false, false);

        let read = WorkloadSpec { read_percentage: 100, ..write };
        let lenient = IoWorker::new(verify_on(), EngineOptions::default())
            .run(&ns, queue.as_mut(), &read)
            .unwrap();
        assert!(lenient.is_success());

        let strict = DriverConfig {
            strict_deallocate: true,
            ..verify_on()
        };
        let result = IoWorker::new(strict, EngineOptions::default())
            .run(&ns, queue.as_mut(), &read)
            .unwrap();
        assert_eq!(result.io_count_read, 0);
        assert_eq!(result.error_count, 8);
        assert_eq!(result.corruptions[0].kind, crate::integrity::CorruptionKind::NonZero);
    }

    #[test]
    fn test_stop_signal() {
        let (sim, ns) = setup(1000);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let stop = StopSignal::new();
        stop.stop();
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default()).with_stop_signal(stop);

        let result = worker.run(&ns, queue.as_mut(), &spec(1000)).unwrap();
        assert_eq!(result.io_count(), 0);
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[test]
    fn test_fua_flags_follow_config() {
        let (sim, ns) = setup(1000);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let driver = DriverConfig {
            fua_write: true,
            ..DriverConfig::default()
        };
        let mut worker = IoWorker::new(driver, EngineOptions::default());
        let mixed = WorkloadSpec { read_percentage: 50, ..spec(100) };
        worker.run(&ns, queue.as_mut(), &mixed).unwrap();

        for op in sim.submitted_operations() {
            assert_eq!(op.flags.contains(IoFlags::FUA), op.direction == Direction::Write);
        }
    }

    #[test]
    fn test_tags_are_buffer_slots() {
        let (sim, ns) = setup(1000);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());
        worker.run(&ns, queue.as_mut(), &spec(40)).unwrap();
        assert!(sim.submitted_operations().iter().all(|op| op.tag < 4));
    }

    #[test]
    fn test_weighted_sizes_stay_in_region() {
        let (sim, ns) = setup(1000);
        let mut queue = sim.create_queue(0, 8).unwrap();
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());
        let mut s = spec(500);
        s.qdepth = 8;
        s.region_start = 100;
        s.region_end = 900;
        s.size_distribution = vec![
            SizeWeight { blocks: 1, ratio: 60, align: 1 },
            SizeWeight { blocks: 16, ratio: 40, align: 8 },
        ];
        let result = worker.run(&ns, queue.as_mut(), &s).unwrap();
        assert!(result.is_success());
        for op in sim.submitted_operations() {
            assert!(op.lba >= 100 && op.lba + op.blocks as u64 <= 900);
        }
    }

    #[test]
    fn test_recent_commands_and_counters() {
        let (sim, ns) = setup(1000);
        let mut queue = sim.create_queue(0, 4).unwrap();
        let mut worker = IoWorker::new(DriverConfig::default(), EngineOptions::default());
        let s = WorkloadSpec { cmdlog_len: 10, ..spec(30) };
        let result = worker.run(&ns, queue.as_mut(), &s).unwrap();

        assert_eq!(result.recent_commands.len(), 10);
        assert!(result.recent_commands.iter().all(|e| e.status == Some(0)));
        assert_eq!(result.io_counter_per_second.iter().sum::<u32>(), 30);
        assert_eq!(result.io_counter_per_latency.iter().sum::<u32>(), 30);
        assert_eq!(result.seed, 11);
    }
}
