//! The work-item stack bank.
//!
//! A worker executes all work-items of one work-group on a bank of small
//! private stacks carved out of a page-aligned slab: one page per
//! work-item, linked in a ring. Every stack is pre-seeded with a frame
//! that enters the group-parallel stub, so `run` simply switches onto the
//! first work-item stack; a barrier switches to the next stack in the
//! ring, resuming it wherever it last yielded. When the first work-item's
//! stub finally returns (after every item ran to completion), control
//! switches back to the worker's own stack.
//!
//! Because every work-item of a group runs on one OS thread, the switch is
//! a pure in-thread coroutine yield: save the callee-saved registers and
//! the stack pointer, load the next stack's saved pointer. That primitive
//! is the only machine-specific piece of the runtime and lives in the
//! per-architecture leaf modules below.
//!
//! In debug builds the slab interleaves inaccessible guard pages between
//! the work-item stacks so an overflowing kernel faults instead of
//! corrupting its neighbour.

use std::cell::Cell;
use std::fmt::Write as _;
use std::os::raw::c_void;
use std::ptr;

use crate::frontend::KernelFn;
use crate::sys;

#[cfg(target_arch = "x86_64")]
#[path = "stack/x86_64.rs"]
mod arch;

#[cfg(target_arch = "x86")]
#[path = "stack/x86.rs"]
mod arch;

#[cfg(target_arch = "aarch64")]
#[path = "stack/aarch64.rs"]
mod arch;

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
compile_error!("no work-item stack switch support for this architecture");

extern "C" {
    /// Saves the current callee-saved context and stack pointer through
    /// `save`, then resumes from the context stored through `load`.
    /// Passing `save == load` is a no-op resume.
    fn clrun_stack_switch(save: *mut *mut u8, load: *const *mut u8);
}

pub(crate) type EntryPoint = KernelFn;

thread_local! {
    static CURRENT_STACK: Cell<*mut ExecutionStack> = Cell::new(ptr::null_mut());
}

struct Slab {
    base: *mut u8,
    len: usize,
}

impl Slab {
    fn map(len: usize) -> Slab {
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert!(
            base != libc::MAP_FAILED,
            "work-item stack slab allocation failed"
        );

        Slab {
            base: base as *mut u8,
            len,
        }
    }

    fn remap(&mut self, len: usize) {
        if len <= self.len {
            return;
        }
        let next = Slab::map(len);
        *self = next;
    }

    #[cfg(debug_assertions)]
    fn protect(&self, offset: usize, len: usize, prot: libc::c_int) {
        let rc = unsafe { libc::mprotect(self.base.add(offset) as *mut c_void, len, prot) };
        debug_assert_eq!(rc, 0, "mprotect on stack slab failed");
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.base as *mut c_void, self.len) };
    }
}

pub(crate) struct ExecutionStack {
    slab: Slab,
    /// Saved stack pointer of each work-item stack while suspended.
    frames: Vec<*mut u8>,
    items: usize,
    cur: usize,
    /// The worker's own stack pointer while work-items run.
    return_sp: *mut u8,
    entry: EntryPoint,
    args: *const *mut c_void,
}

unsafe impl Send for ExecutionStack {}

unsafe extern "C" fn unset_entry(_args: *const *mut c_void) {
    unreachable!("work-item stack entered without a reset");
}

impl ExecutionStack {
    /// `l1_size` is the first-level data cache of the core this stack
    /// serves; ideally the whole bank stays resident there.
    pub fn new(l1_size: usize) -> ExecutionStack {
        let page = sys::page_size();
        let len = (4 * l1_size).max(page);

        ExecutionStack {
            slab: Slab::map(round_up(len, page)),
            frames: Vec::new(),
            items: 0,
            cur: 0,
            return_sp: ptr::null_mut(),
            entry: unset_entry,
            args: ptr::null(),
        }
    }

    fn item_stride(page: usize) -> usize {
        if cfg!(debug_assertions) {
            2 * page
        } else {
            page
        }
    }

    fn item_base(&self, page: usize, index: usize) -> usize {
        let lead = if cfg!(debug_assertions) { page } else { 0 };
        lead + index * Self::item_stride(page)
    }

    /// Re-seeds the bank for a work-group of `items` work-items, each
    /// entering `entry` with the shared packed-argument array.
    pub fn reset(&mut self, entry: EntryPoint, args: *const *mut c_void, items: usize) {
        assert!(items > 0, "cannot run an empty work-group");

        let page = sys::page_size();
        let lead = if cfg!(debug_assertions) { page } else { 0 };
        let required = lead + items * Self::item_stride(page);

        #[cfg(debug_assertions)]
        {
            // Lift the guards before the slab is reused or replaced.
            self.slab.protect(0, self.slab.len, libc::PROT_READ | libc::PROT_WRITE);
        }

        self.slab.remap(required);

        #[cfg(debug_assertions)]
        unsafe {
            ptr::write_bytes(self.slab.base, 0, self.slab.len);
        }

        self.entry = entry;
        self.args = args;
        self.items = items;
        self.cur = 0;
        self.frames.clear();

        for i in 0..items {
            let base = self.item_base(page, i);

            #[cfg(debug_assertions)]
            self.slab.protect(base - page, page, libc::PROT_NONE);

            let top = unsafe { self.slab.base.add(base + page) };
            self.frames.push(unsafe { arch::seed_stack(top) });
        }

        #[cfg(debug_assertions)]
        {
            let end = self.item_base(page, items) - page;
            if end + page <= self.slab.len {
                self.slab.protect(end, page, libc::PROT_NONE);
            }
        }
    }

    /// Runs the group: enters the first work-item and returns once the
    /// whole group has finished.
    pub fn run(&mut self) {
        let this = self as *mut ExecutionStack;
        CURRENT_STACK.with(|c| c.set(this));

        unsafe {
            clrun_stack_switch(&mut self.return_sp, &self.frames[0]);
        }

        CURRENT_STACK.with(|c| c.set(ptr::null_mut()));
    }

    /// Yields from the current work-item to the next one in the ring.
    /// With a single work-item this resumes in place.
    pub fn switch_to_next(&mut self) {
        let cur = self.cur;
        let next = (cur + 1) % self.items;
        self.cur = next;

        unsafe {
            let frames = self.frames.as_mut_ptr();
            clrun_stack_switch(frames.add(cur), frames.add(next));
        }
    }

    /// Leaves the work-item world for good; called when the first
    /// work-item's stub returns.
    fn finish(&mut self) {
        let cur = self.cur;
        unsafe {
            let frames = self.frames.as_mut_ptr();
            clrun_stack_switch(frames.add(cur), &self.return_sp);
        }
    }

    /// Hex dump of one work-item stack, for debugging kernels.
    #[allow(dead_code)]
    pub fn dump(&self, index: usize) -> String {
        let page = sys::page_size();
        let base = self.item_base(page, index);
        let mut out = String::new();

        let _ = writeln!(
            out,
            "work-item stack {} [{:p}, {:p}):",
            index,
            unsafe { self.slab.base.add(base) },
            unsafe { self.slab.base.add(base + page) },
        );

        for row in (0..page).step_by(16) {
            let addr = unsafe { self.slab.base.add(base + row) };
            let _ = write!(out, "  {:p}:", addr);
            for byte in 0..16 {
                let _ = write!(out, " {:02x}", unsafe { *addr.add(byte) });
            }
            let _ = writeln!(out);
        }

        out
    }
}

fn round_up(value: usize, to: usize) -> usize {
    (value + to - 1) / to * to
}

/// The landing point of a freshly seeded work-item stack. Runs the entry
/// for the current bank, and when the entry returns (only ever on the
/// work-item that opened the group) hands control back to the worker.
#[no_mangle]
extern "C" fn clrun_work_item_main() -> ! {
    let stack = CURRENT_STACK.with(|c| c.get());
    assert!(!stack.is_null(), "work-item boot outside a stack run");

    unsafe {
        let entry = (*stack).entry;
        let args = (*stack).args;
        entry(args);
        (*stack).finish();
    }

    unreachable!("resumed a finished work-item stack");
}
