//! Runtime tests: the property-level invariants and the end-to-end
//! kernel scenarios, executed against the fixture front-end.


mod dims_props;
mod events;
mod kernel_exec;
mod memory;
mod native;

use std::sync::Arc;

use crate::hw;
use crate::standard::{
    Context, Device, Platform, Program, Queue, QueueProperties,
};
use crate::util;

pub(crate) struct Harness {
    pub platform: Platform,
    pub device: Device,
    pub ctx: Context,
    pub queue: Queue,
}

/// A fixed, small machine shape so tests do not scale with the host.
pub(crate) fn test_topology(cpus: usize, memory_size: usize) -> hw::Topology {
    hw::Topology {
        nodes: vec![hw::Node {
            memory_size,
            llc_groups: vec![hw::CacheGroup {
                size: 1 << 20,
                line_size: 64,
                l1_size: 32 << 10,
                cpus: (0..cpus).map(|os_id| hw::Cpu { os_id }).collect(),
            }],
        }],
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(QueueProperties::empty(), 2)
}

pub(crate) fn harness_with(props: QueueProperties, cpus: usize) -> Harness {
    let platform = Platform::builder()
        .frontend(Arc::new(fixtures::FixtureFrontend::new()))
        .topology(test_topology(cpus, 64 << 20))
        .build()
        .unwrap();

    let device = platform.devices()[0].clone();
    let ctx = Context::new(&platform, &[device.clone()], None).unwrap();
    let queue = Queue::new(&ctx, &device, props).unwrap();

    Harness {
        platform,
        device,
        ctx,
        queue,
    }
}

/// Builds the fixture program for `source` and returns its only kernel.
pub(crate) fn built_kernel(h: &Harness, source: &str, name: &str) -> crate::Kernel {
    let program = Program::with_source(&h.ctx, source).unwrap();
    program.build(&[], "", None).unwrap();
    program.create_kernel(name).unwrap()
}

pub(crate) fn read_u32s(h: &Harness, buf: &crate::Buffer, count: usize) -> Vec<u32> {
    let mut out = vec![0u32; count];
    h.queue
        .read_buffer(buf, util::slice_bytes_mut(&mut out))
        .enq()
        .unwrap();
    out
}

#[test]
fn platform_advertises_profile_and_devices() {
    let h = harness();

    assert_eq!(h.platform.profile(), "FULL_PROFILE");
    assert_eq!(h.platform.version(), "OpenCL 1.1");
    assert_eq!(h.platform.devices().len(), 1);

    let cpus = h
        .platform
        .devices_by_type(crate::DeviceType::CPU)
        .unwrap();
    assert_eq!(cpus.len(), 1);
    assert!(h.platform.devices_by_type(crate::DeviceType::GPU).is_err());

    let dev = &h.platform.devices()[0];
    assert_eq!(dev.max_compute_units(), 2);
    assert_eq!(dev.max_work_item_dimensions(), 3);
    assert!(dev.supports_native_kernels());
    assert!(dev.compiler_available());
}
