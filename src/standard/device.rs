//! A compute device handle.

use std::sync::Arc;

use crate::cpu::CpuDevice;

bitflags::bitflags! {
    pub struct DeviceType: u32 {
        const DEFAULT = 1 << 0;
        const CPU = 1 << 1;
        const GPU = 1 << 2;
        const ACCELERATOR = 1 << 3;
        const ALL = 0xFFFF_FFFF;
    }
}

/// The attribute table a device advertises.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub max_compute_units: usize,
    pub max_work_item_dimensions: usize,
    pub max_work_item_sizes: [usize; 3],
    pub max_work_group_size: usize,
    pub max_mem_alloc_size: usize,
    pub global_mem_size: usize,
    pub global_mem_cacheline_size: usize,
    pub global_mem_cache_size: usize,
    pub local_mem_size: usize,
    pub private_mem_size: usize,
    pub size_type_max: usize,
    pub compiler_available: bool,
    pub host_unified_memory: bool,
    pub can_exec_kernel: bool,
    pub can_exec_native_kernel: bool,
}

/// A device handle. Clones share the device; devices live as long as any
/// platform, context or kernel referencing them.
#[derive(Clone)]
pub struct Device(pub(crate) Arc<CpuDevice>);

impl Device {
    pub fn info(&self) -> &DeviceInfo {
        self.0.info()
    }

    pub fn device_type(&self) -> DeviceType {
        DeviceType::CPU
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn vendor(&self) -> &str {
        &self.info().vendor
    }

    pub fn max_compute_units(&self) -> usize {
        self.info().max_compute_units
    }

    pub fn max_work_item_dimensions(&self) -> usize {
        self.info().max_work_item_dimensions
    }

    pub fn max_work_item_sizes(&self) -> [usize; 3] {
        self.info().max_work_item_sizes
    }

    pub fn max_work_group_size(&self) -> usize {
        self.info().max_work_group_size
    }

    pub fn max_mem_alloc_size(&self) -> usize {
        self.info().max_mem_alloc_size
    }

    pub fn global_mem_size(&self) -> usize {
        self.info().global_mem_size
    }

    pub fn local_mem_size(&self) -> usize {
        self.info().local_mem_size
    }

    pub fn private_mem_size(&self) -> usize {
        self.info().private_mem_size
    }

    pub fn size_type_max(&self) -> usize {
        self.info().size_type_max
    }

    pub fn compiler_available(&self) -> bool {
        self.info().compiler_available
    }

    pub fn supports_native_kernels(&self) -> bool {
        self.info().can_exec_native_kernel
    }

    /// Bytes left in the device global arena; settles once outstanding
    /// commands finish.
    pub fn global_mem_available(&self) -> usize {
        self.0.global_memory().available()
    }

    pub(crate) fn cpu(&self) -> &CpuDevice {
        &self.0
    }

    pub(crate) fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.info().name)
            .field("compute_units", &self.info().max_compute_units)
            .finish()
    }
}
