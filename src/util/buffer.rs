//! DMA-capable buffers and the per-queue buffer pool
//!
//! Commands take ownership of their buffer for the time they are in flight and
//! hand it back with the completion, so a buffer can never be touched while the
//! device may still be writing into it. The pool is sized to the queue depth at
//! run start and never grows afterwards.

use crate::Result;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::VecDeque;

/// Zero-initialized, aligned buffer with the bus address the device should use
///
/// Real drivers hand out pinned memory with a physical address; the simulated
/// controller uses the virtual address.
pub struct DmaBuffer {
    ptr: *mut u8,
    size: usize,
    phys_addr: u64,
    layout: Layout,
}

impl DmaBuffer {
    /// Allocate `size` bytes aligned to `alignment`
    ///
    /// # Errors
    /// Fails when the alignment is not a power of two, the size is zero or the
    /// allocator is out of memory.
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            anyhow::bail!("buffer alignment {} is not a power of 2", alignment);
        }
        if size == 0 {
            anyhow::bail!("buffer size must be greater than 0");
        }

        let layout = Layout::from_size_align(size, alignment)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            anyhow::bail!("failed to allocate {} byte DMA buffer", size);
        }

        Ok(DmaBuffer {
            ptr,
            size,
            phys_addr: ptr as u64,
            layout,
        })
    }

    /// Override the bus address (driver layers that pin memory themselves)
    pub fn with_phys_addr(mut self, phys_addr: u64) -> Self {
        self.phys_addr = phys_addr;
        self
    }

    #[inline(always)]
    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr, self.layout);
        }
    }
}

impl std::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("size", &self.size)
            .field("phys_addr", &format_args!("0x{:x}", self.phys_addr))
            .finish()
    }
}

// DmaBuffer owns its memory exclusively
unsafe impl Send for DmaBuffer {}

/// Fixed set of buffers, one slot per possible outstanding command
///
/// The slot index doubles as the command tag: a buffer checked out with
/// `take()` comes back through `give_back()` under the same index.
pub struct BufferPool {
    slots: Vec<Option<DmaBuffer>>,
    available: VecDeque<usize>,
    buffer_size: usize,
}

impl BufferPool {
    /// Build a pool from already-allocated buffers
    pub fn from_buffers(buffers: Vec<DmaBuffer>) -> Self {
        let buffer_size = buffers.iter().map(DmaBuffer::size).min().unwrap_or(0);
        let available = (0..buffers.len()).collect();
        BufferPool {
            slots: buffers.into_iter().map(Some).collect(),
            available,
            buffer_size,
        }
    }

    /// Allocate `count` buffers through `alloc`
    pub fn allocate<F>(count: usize, buffer_size: usize, mut alloc: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<DmaBuffer>,
    {
        let buffers = (0..count)
            .map(|_| alloc(buffer_size))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_buffers(buffers))
    }

    /// Check out a free buffer together with its slot index
    #[inline(always)]
    pub fn take(&mut self) -> Option<(usize, DmaBuffer)> {
        let index = self.available.pop_front()?;
        let buffer = self.slots[index].take()?;
        Some((index, buffer))
    }

    /// Return a buffer to its slot
    ///
    /// # Panics
    /// Panics if the slot is out of range or already occupied.
    #[inline(always)]
    pub fn give_back(&mut self, index: usize, buffer: DmaBuffer) {
        assert!(index < self.slots.len(), "invalid buffer slot {}", index);
        assert!(self.slots[index].is_none(), "buffer slot {} returned twice", index);
        self.slots[index] = Some(buffer);
        self.available.push_back(index);
    }

    #[inline]
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    #[inline]
    pub fn total_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
