//! Work-item builtins.
//!
//! These are the functions kernel code links against: the index-space
//! queries and the work-group barrier. They read the executing worker's
//! current dimension cursor; outside a kernel every query answers zero.
//! The name-to-address table below is the device's builtin library: the
//! namespace module externals resolve against when a module is added to
//! the kernel engine.

use crate::cpu::worker;

bitflags::bitflags! {
    /// Memory-fence flags carried by `barrier`. On a single-address-space
    /// CPU device every fence degrades to a compiler fence.
    #[repr(transparent)]
    pub struct MemFenceFlags: u64 {
        const LOCAL_MEM_FENCE = 1 << 0;
        const GLOBAL_MEM_FENCE = 1 << 1;
    }
}

fn query(f: impl FnOnce(&crate::dims::DimensionIter) -> usize) -> usize {
    worker::with_current_ctx(|ctx| {
        ctx.and_then(|c| c.block.as_ref().map(|b| f(&b.cur)))
            .unwrap_or(0)
    })
}

pub extern "C" fn get_work_dim() -> u32 {
    query(|cur| cur.work_dim()) as u32
}

pub extern "C" fn get_global_size(dim: u32) -> usize {
    query(|cur| cur.global_size(dim as usize))
}

pub extern "C" fn get_global_id(dim: u32) -> usize {
    query(|cur| cur.global_id(dim as usize))
}

pub extern "C" fn get_local_size(dim: u32) -> usize {
    query(|cur| cur.local_size(dim as usize))
}

pub extern "C" fn get_local_id(dim: u32) -> usize {
    query(|cur| cur.local_id(dim as usize))
}

pub extern "C" fn get_num_groups(dim: u32) -> usize {
    query(|cur| cur.num_groups(dim as usize))
}

pub extern "C" fn get_group_id(dim: u32) -> usize {
    query(|cur| cur.group_id(dim as usize))
}

pub extern "C" fn get_global_offset(dim: u32) -> usize {
    query(|cur| cur.global_offset(dim as usize))
}

/// Work-group barrier: cooperatively yields to the next work-item of the
/// group. All work-items run on one thread, so no cross-thread
/// synchronization is involved; the fence flags only pin compiler
/// ordering.
pub extern "C" fn barrier(_flags: MemFenceFlags) {
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
    worker::switch_to_next_work_item();
    std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
}

/// `barrier` behind the raw `u64` ABI compiled kernel code carries; this
/// is the address the builtin library hands out.
extern "C" fn barrier_raw(flags: u64) {
    barrier(MemFenceFlags::from_bits_truncate(flags));
}

/// The builtin library: every name kernel modules may declare external.
pub(crate) fn library() -> &'static [(&'static str, usize)] {
    lazy_static::lazy_static! {
        static ref TABLE: Vec<(&'static str, usize)> = vec![
            ("get_work_dim", get_work_dim as usize),
            ("get_global_size", get_global_size as usize),
            ("get_global_id", get_global_id as usize),
            ("get_local_size", get_local_size as usize),
            ("get_local_id", get_local_id as usize),
            ("get_num_groups", get_num_groups as usize),
            ("get_group_id", get_group_id as usize),
            ("get_global_offset", get_global_offset as usize),
            ("barrier", barrier_raw as usize),
        ];
    }
    &TABLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_answer_zero_outside_a_kernel() {
        assert_eq!(get_work_dim(), 0);
        assert_eq!(get_global_id(0), 0);
        assert_eq!(get_local_size(2), 0);
    }

    #[test]
    fn library_covers_the_query_surface_and_barrier() {
        let names: Vec<_> = library().iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"barrier"));
        assert!(names.contains(&"get_global_id"));
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn fence_flags_survive_the_raw_abi() {
        let both = MemFenceFlags::LOCAL_MEM_FENCE | MemFenceFlags::GLOBAL_MEM_FENCE;
        assert_eq!(MemFenceFlags::from_bits_truncate(both.bits()), both);

        // Unknown bits from foreign kernel code are dropped, not kept.
        assert_eq!(
            MemFenceFlags::from_bits_truncate(both.bits() | (1 << 7)),
            both
        );
    }
}
