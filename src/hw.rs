//! Hardware topology, as consumed by the CPU device.
//!
//! The runtime only cares about the shape of the machine: NUMA nodes, each
//! holding one or more last-level-cache groups, each holding cores. A
//! multiprocessor is created per LLC group and a pinned worker thread per
//! core; the node memory size bounds the device's global arena and the L1
//! size drives the work-item stack slab. Probing is a collaborator service;
//! the default prober below is deliberately conservative and can be
//! replaced wholesale by constructing `Topology` values directly.

/// A single logical CPU.
#[derive(Clone, Debug)]
pub struct Cpu {
    /// OS-level CPU id, usable for affinity calls.
    pub os_id: usize,
}

/// A group of cores sharing a last-level cache.
#[derive(Clone, Debug)]
pub struct CacheGroup {
    /// Last-level cache size in bytes.
    pub size: usize,
    /// Cache line size in bytes.
    pub line_size: usize,
    /// First-level data cache size in bytes (per core).
    pub l1_size: usize,
    pub cpus: Vec<Cpu>,
}

/// A NUMA node: memory plus the LLC groups it hosts.
#[derive(Clone, Debug)]
pub struct Node {
    /// Usable memory on this node, in bytes.
    pub memory_size: usize,
    pub llc_groups: Vec<CacheGroup>,
}

#[derive(Clone, Debug)]
pub struct Topology {
    pub nodes: Vec<Node>,
}

impl Node {
    pub fn cpu_count(&self) -> usize {
        self.llc_groups.iter().map(|g| g.cpus.len()).sum()
    }

    /// Geometry of the first LLC group, assuming a symmetric node.
    pub fn first_llc(&self) -> Option<&CacheGroup> {
        self.llc_groups.first()
    }
}

const DEFAULT_LLC_SIZE: usize = 8 << 20;
const DEFAULT_L1_SIZE: usize = 32 << 10;
const DEFAULT_LINE_SIZE: usize = 64;
const DEFAULT_MEMORY_SIZE: usize = 2 << 30;

/// Probes the host machine.
///
/// Reports a single node containing a single LLC group with every available
/// core. Memory size comes from `/proc/meminfo` where present.
pub fn detect() -> Topology {
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let cpus = (0..cpu_count).map(|os_id| Cpu { os_id }).collect();

    Topology {
        nodes: vec![Node {
            memory_size: probe_memory_size().unwrap_or(DEFAULT_MEMORY_SIZE),
            llc_groups: vec![CacheGroup {
                size: DEFAULT_LLC_SIZE,
                line_size: DEFAULT_LINE_SIZE,
                l1_size: DEFAULT_L1_SIZE,
                cpus,
            }],
        }],
    }
}

#[cfg(target_os = "linux")]
fn probe_memory_size() -> Option<usize> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kib: usize = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kib * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn probe_memory_size() -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_reports_at_least_one_core() {
        let topo = detect();
        assert_eq!(topo.nodes.len(), 1);
        assert!(topo.nodes[0].cpu_count() >= 1);
        assert!(topo.nodes[0].memory_size > 0);
    }
}
