//! Simulated controller for tests
//!
//! An in-memory device behind the [`Controller`]/[`QueuePair`] traits. Writes
//! land in a per-LBA media map and reads copy them back (never-written blocks
//! read as zeros), so integrity verification works end to end without
//! hardware.
//!
//! # Fault injection
//!
//! Faults are armed either for the n-th submission on the controller or for
//! the next command in a given direction:
//!
//! - `Fault::Status`: complete with an error status, media untouched
//! - `Fault::CorruptRead`: flip a payload byte after the read data is copied
//! - `Fault::Drop`: accept the command and never complete it
//! - `Fault::Timeout`: complete with `TimedOut` and fire the timeout callback
//!
//! # Example
//!
//! ```
//! use ioworker::driver::sim::{Fault, SimController};
//! use ioworker::driver::{Controller, Direction};
//! use std::sync::Arc;
//!
//! let controller = Arc::new(SimController::new(512, 1024));
//! controller.inject_next(Direction::Read, Fault::CorruptRead);
//! let queue = controller.create_queue(0, 32).unwrap();
//! assert_eq!(queue.depth(), 32);
//! ```

use super::{
    AerCallback, Command, CommandStatus, Completion, Controller, Direction, IoFlags,
    NamespaceGeometry, QueueId, QueuePair, TimeoutCallback,
};
use crate::integrity::LBA_STAMP_LEN;
use crate::util::buffer::DmaBuffer;
use crate::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Alignment of buffers handed out by the simulated controller
const SIM_BUFFER_ALIGN: usize = 4096;

/// Size of the emulated PCIe configuration space
const PCIE_CFG_SIZE: usize = 4096;

/// Misbehavior to apply to one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Status { sct: u8, sc: u8 },
    CorruptRead,
    Drop,
    Timeout,
}

/// Record of a submitted command for test assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub queue: QueueId,
    pub tag: u64,
    pub direction: Direction,
    pub lba: u64,
    pub blocks: u32,
    pub flags: IoFlags,
}

#[derive(Default)]
struct FaultPlan {
    by_index: HashMap<u64, Fault>,
    next: Vec<(Direction, Fault)>,
}

impl FaultPlan {
    fn take(&mut self, index: u64, direction: Direction) -> Option<Fault> {
        if let Some(fault) = self.by_index.remove(&index) {
            return Some(fault);
        }
        let pos = self.next.iter().position(|(d, _)| *d == direction)?;
        Some(self.next.remove(pos).1)
    }
}

struct SimState {
    geometry: NamespaceGeometry,
    media: Mutex<HashMap<u64, Box<[u8]>>>,
    faults: Mutex<FaultPlan>,
    latency: Mutex<Duration>,
    submitted: Mutex<Vec<SubmissionRecord>>,
    submit_index: AtomicU64,
    next_qid: AtomicU16,
    registers: Mutex<HashMap<u32, u64>>,
    pcie_cfg: Mutex<Vec<u8>>,
    timeout_cb: Mutex<Option<TimeoutCallback>>,
    aer_cb: Mutex<Option<AerCallback>>,
}

/// In-memory controller with a single namespace (nsid 1)
#[derive(Clone)]
pub struct SimController {
    state: Arc<SimState>,
}

impl SimController {
    pub fn new(sector_size: usize, num_sectors: u64) -> Self {
        Self {
            state: Arc::new(SimState {
                geometry: NamespaceGeometry {
                    sector_size,
                    num_sectors,
                },
                media: Mutex::new(HashMap::new()),
                faults: Mutex::new(FaultPlan::default()),
                latency: Mutex::new(Duration::ZERO),
                submitted: Mutex::new(Vec::new()),
                submit_index: AtomicU64::new(0),
                next_qid: AtomicU16::new(1),
                registers: Mutex::new(HashMap::new()),
                pcie_cfg: Mutex::new(vec![0; PCIE_CFG_SIZE]),
                timeout_cb: Mutex::new(None),
                aer_cb: Mutex::new(None),
            }),
        }
    }

    /// Latency applied to every subsequently submitted command
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock().unwrap() = latency;
    }

    /// Arm a fault for the `index`-th submission (0-based, controller-wide)
    pub fn inject_nth(&self, index: u64, fault: Fault) {
        self.state.faults.lock().unwrap().by_index.insert(index, fault);
    }

    /// Arm a fault for the next command in `direction`
    pub fn inject_next(&self, direction: Direction, fault: Fault) {
        self.state.faults.lock().unwrap().next.push((direction, fault));
    }

    pub fn submitted_operations(&self) -> Vec<SubmissionRecord> {
        self.state.submitted.lock().unwrap().clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.state.submitted.lock().unwrap().len()
    }

    /// Current media content of one block, zeros if never written
    pub fn read_block(&self, lba: u64) -> Vec<u8> {
        self.state
            .media
            .lock()
            .unwrap()
            .get(&lba)
            .map(|b| b.to_vec())
            .unwrap_or_else(|| vec![0; self.state.geometry.sector_size])
    }

    /// Deliver an asynchronous event to the registered handler
    pub fn fire_aer(&self, dword0: u32) -> bool {
        match self.state.aer_cb.lock().unwrap().as_ref() {
            Some(cb) => {
                cb(dword0);
                true
            }
            None => false,
        }
    }
}

impl Controller for SimController {
    fn create_queue(&self, _priority: u8, depth: usize) -> Result<Box<dyn QueuePair>> {
        if depth == 0 {
            anyhow::bail!("queue depth must be at least 1");
        }
        let id = self.state.next_qid.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SimQueue {
            id,
            depth,
            state: Arc::clone(&self.state),
            pending: VecDeque::with_capacity(depth),
            dropped: Vec::new(),
        }))
    }

    fn destroy_queue(&self, queue: Box<dyn QueuePair>) -> Result<()> {
        drop(queue);
        Ok(())
    }

    fn namespace_geometry(&self, nsid: u32) -> Result<NamespaceGeometry> {
        if nsid != 1 {
            anyhow::bail!("namespace {} does not exist", nsid);
        }
        Ok(self.state.geometry)
    }

    fn read_reg32(&self, offset: u32) -> Result<u32> {
        Ok(self.read_reg64(offset)? as u32)
    }

    fn write_reg32(&self, offset: u32, value: u32) -> Result<()> {
        self.write_reg64(offset, value as u64)
    }

    fn read_reg64(&self, offset: u32) -> Result<u64> {
        if offset % 4 != 0 {
            anyhow::bail!("unaligned register offset 0x{:x}", offset);
        }
        Ok(self.state.registers.lock().unwrap().get(&offset).copied().unwrap_or(0))
    }

    fn write_reg64(&self, offset: u32, value: u64) -> Result<()> {
        if offset % 4 != 0 {
            anyhow::bail!("unaligned register offset 0x{:x}", offset);
        }
        self.state.registers.lock().unwrap().insert(offset, value);
        Ok(())
    }

    fn pcie_cfg_read8(&self, offset: u32) -> Result<u8> {
        self.state
            .pcie_cfg
            .lock()
            .unwrap()
            .get(offset as usize)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("config space offset 0x{:x} out of range", offset))
    }

    fn pcie_cfg_write8(&self, offset: u32, value: u8) -> Result<()> {
        let mut cfg = self.state.pcie_cfg.lock().unwrap();
        let byte = cfg
            .get_mut(offset as usize)
            .ok_or_else(|| anyhow::anyhow!("config space offset 0x{:x} out of range", offset))?;
        *byte = value;
        Ok(())
    }

    fn register_timeout_cb(&self, _timeout: Duration, callback: Option<TimeoutCallback>) {
        *self.state.timeout_cb.lock().unwrap() = callback;
    }

    fn register_aer_cb(&self, callback: Option<AerCallback>) {
        *self.state.aer_cb.lock().unwrap() = callback;
    }

    fn alloc_buffer(&self, bytes: usize) -> Result<DmaBuffer> {
        DmaBuffer::new(bytes, SIM_BUFFER_ALIGN)
    }
}

struct PendingCompletion {
    ready_at: Instant,
    completion: Completion,
}

/// Queue pair on a [`SimController`]
pub struct SimQueue {
    id: QueueId,
    depth: usize,
    state: Arc<SimState>,
    pending: VecDeque<PendingCompletion>,
    /// Commands swallowed by `Fault::Drop`; they hold their buffers forever
    dropped: Vec<Command>,
}

impl SimQueue {
    fn outstanding(&self) -> usize {
        self.pending.len() + self.dropped.len()
    }

    fn execute(&self, command: &mut Command, fault: Option<Fault>) -> CommandStatus {
        let geometry = self.state.geometry;
        if command.lba + command.blocks as u64 > geometry.num_sectors {
            // LBA out of range
            return CommandStatus::Error { sct: 0x00, sc: 0x80 };
        }
        match fault {
            Some(Fault::Status { sct, sc }) => return CommandStatus::Error { sct, sc },
            Some(Fault::Timeout) => return CommandStatus::TimedOut,
            _ => {}
        }

        let sector = geometry.sector_size;
        let data = command.buffer.as_mut_slice();
        let mut media = self.state.media.lock().unwrap();
        for i in 0..command.blocks as usize {
            let lba = command.lba + i as u64;
            let block = &mut data[i * sector..(i + 1) * sector];
            match command.direction {
                Direction::Write => {
                    media.insert(lba, block.to_vec().into_boxed_slice());
                }
                Direction::Read => match media.get(&lba) {
                    Some(stored) => block.copy_from_slice(stored),
                    None => block.fill(0),
                },
            }
        }

        if fault == Some(Fault::CorruptRead) && command.direction == Direction::Read {
            data[LBA_STAMP_LEN] ^= 0xFF;
        }

        CommandStatus::Success
    }
}

impl QueuePair for SimQueue {
    fn id(&self) -> QueueId {
        self.id
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn submit(&mut self, mut command: Command) -> Result<()> {
        if self.outstanding() >= self.depth {
            anyhow::bail!("queue {} is full ({} outstanding)", self.id, self.depth);
        }
        let needed = command.blocks as usize * self.state.geometry.sector_size;
        if command.buffer.size() < needed {
            anyhow::bail!(
                "buffer of {} bytes too small for {} blocks",
                command.buffer.size(),
                command.blocks
            );
        }

        self.state.submitted.lock().unwrap().push(SubmissionRecord {
            queue: self.id,
            tag: command.tag,
            direction: command.direction,
            lba: command.lba,
            blocks: command.blocks,
            flags: command.flags,
        });

        let index = self.state.submit_index.fetch_add(1, Ordering::Relaxed);
        let fault = self.state.faults.lock().unwrap().take(index, command.direction);
        if fault == Some(Fault::Drop) {
            self.dropped.push(command);
            return Ok(());
        }

        let status = self.execute(&mut command, fault);
        if status == CommandStatus::TimedOut {
            if let Some(cb) = self.state.timeout_cb.lock().unwrap().as_ref() {
                cb(self.id, command.tag);
            }
        }

        let latency = *self.state.latency.lock().unwrap();
        self.pending.push_back(PendingCompletion {
            ready_at: Instant::now() + latency,
            completion: Completion {
                tag: command.tag,
                status,
                buffer: command.buffer,
            },
        });
        Ok(())
    }

    fn poll(&mut self, max_completions: usize, wait: Duration) -> Result<Vec<Completion>> {
        let deadline = Instant::now() + wait;
        let mut ready = Vec::new();

        loop {
            let now = Instant::now();
            let mut i = 0;
            while i < self.pending.len() && ready.len() < max_completions {
                if self.pending[i].ready_at <= now {
                    if let Some(p) = self.pending.remove(i) {
                        ready.push(p.completion);
                    }
                } else {
                    i += 1;
                }
            }

            if !ready.is_empty() || now >= deadline {
                return Ok(ready);
            }

            let next_ready = self.pending.iter().map(|p| p.ready_at).min();
            let wake = next_ready.map_or(deadline, |r| r.min(deadline));
            std::thread::sleep(wake.saturating_duration_since(now));
        }
    }
}
