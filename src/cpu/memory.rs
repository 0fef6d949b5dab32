//! Device memory arenas.

use std::alloc::{alloc, dealloc, Layout};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{err, Result, Status};
use crate::standard::buffer::MemId;

/// The device global arena: a buffer-id → address table plus an
/// available-bytes counter, both guarded by one mutex.
///
/// Owned allocations are cache-line aligned and accounted against the
/// arena capacity. Host-pointer buffers are registered in the same table
/// but are neither owned nor accounted.
pub(crate) struct GlobalMemory {
    line_size: usize,
    state: Mutex<State>,
}

struct State {
    available: usize,
    mappings: HashMap<MemId, Mapping>,
}

struct Mapping {
    addr: *mut u8,
    accounted: usize,
    layout: Option<Layout>,
}

unsafe impl Send for GlobalMemory {}
unsafe impl Sync for GlobalMemory {}

impl GlobalMemory {
    pub fn new(size: usize, line_size: usize) -> GlobalMemory {
        GlobalMemory {
            line_size: line_size.max(1).next_power_of_two(),
            state: Mutex::new(State {
                available: size,
                mappings: HashMap::new(),
            }),
        }
    }

    pub fn available(&self) -> usize {
        self.lock().available
    }

    fn lock(&self) -> std::sync::MutexGuard<State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocates `size` arena bytes for a buffer, optionally seeding them
    /// from `init`. Fails without allocating when the arena cannot cover
    /// the request.
    pub fn alloc(&self, id: MemId, size: usize, init: Option<&[u8]>) -> Result<*mut u8> {
        let mut state = self.lock();

        if state.available < size {
            return err(
                Status::MemObjectAllocationFailure,
                "global memory exhausted",
            );
        }

        let layout = match Layout::from_size_align(size.max(1), self.line_size) {
            Ok(l) => l,
            Err(_) => return err(Status::InvalidBufferSize, "unrepresentable buffer size"),
        };

        let addr = unsafe { alloc(layout) };
        if addr.is_null() {
            return err(
                Status::MemObjectAllocationFailure,
                "host allocation failed",
            );
        }

        if let Some(src) = init {
            debug_assert!(src.len() >= size);
            unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), addr, size) };
        }

        state.available -= size;
        state.mappings.insert(
            id,
            Mapping {
                addr,
                accounted: size,
                layout: Some(layout),
            },
        );

        Ok(addr)
    }

    /// Registers caller-owned storage under a buffer id.
    pub fn register_external(&self, id: MemId, addr: *mut u8) {
        self.lock().mappings.insert(
            id,
            Mapping {
                addr,
                accounted: 0,
                layout: None,
            },
        );
    }

    /// Releases a buffer's mapping, returning its capacity to the arena.
    /// Unknown ids are ignored.
    pub fn free(&self, id: MemId) {
        let mut state = self.lock();

        if let Some(mapping) = state.mappings.remove(&id) {
            state.available += mapping.accounted;
            if let Some(layout) = mapping.layout {
                unsafe { dealloc(mapping.addr, layout) };
            }
        }
    }

    /// The device address of a live buffer, or null.
    pub fn get(&self, id: MemId) -> *mut u8 {
        self.lock()
            .mappings
            .get(&id)
            .map(|m| m.addr)
            .unwrap_or(std::ptr::null_mut())
    }

    /// A full copy of the id → address table, for native kernels whose
    /// argument blocks reference memory objects by id.
    pub fn snapshot(&self) -> HashMap<MemId, *mut u8> {
        self.lock()
            .mappings
            .iter()
            .map(|(&id, m)| (id, m.addr))
            .collect()
    }
}

impl Drop for GlobalMemory {
    fn drop(&mut self) {
        let state = self.lock();
        for mapping in state.mappings.values() {
            if let Some(layout) = mapping.layout {
                unsafe { dealloc(mapping.addr, layout) };
            }
        }
    }
}

/// A worker-local bump arena for work-group local buffers.
///
/// Reset at the start of each ND-range block; allocations are cache-line
/// aligned and live until the next reset.
pub(crate) struct LocalMemory {
    base: *mut u8,
    size: usize,
    layout: Layout,
    next: usize,
}

unsafe impl Send for LocalMemory {}

impl LocalMemory {
    pub fn new(size: usize) -> LocalMemory {
        let layout = Layout::from_size_align(size.max(1), 64).expect("local arena layout");
        let base = unsafe { alloc(layout) };
        assert!(!base.is_null(), "local arena allocation failed");

        LocalMemory {
            base,
            size,
            layout,
            next: 0,
        }
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Bumps out `size` bytes, or `None` when the arena is exhausted.
    pub fn alloc(&mut self, size: usize) -> Option<*mut u8> {
        let aligned = (size + 63) & !63;
        if self.next + aligned > self.size {
            return None;
        }

        let addr = unsafe { self.base.add(self.next) };
        self.next += aligned;
        Some(addr)
    }
}

impl Drop for LocalMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}
