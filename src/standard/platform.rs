//! The platform: the root handle advertising the devices of this process.

use std::sync::Arc;

use crate::cpu::CpuDevice;
use crate::error::{err, Result, Status};
use crate::frontend::{Frontend, NullFrontend};
use crate::hw;
use crate::standard::device::{Device, DeviceType};

const PROFILE: &str = "FULL_PROFILE";
const VERSION: &str = "OpenCL 1.1";
const NAME: &str = "clrun";
const VENDOR: &str = "clrun project";

/// The platform handle. Create one per process, at startup, and share it.
#[derive(Clone)]
pub struct Platform(Arc<PlatformInner>);

struct PlatformInner {
    devices: Vec<Device>,
}

impl Platform {
    /// Returns a [`PlatformBuilder`].
    ///
    /// This is the way to create a platform; the builder is where the
    /// compile service gets injected.
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder {
            frontend: None,
            topology: None,
        }
    }

    pub fn profile(&self) -> &'static str {
        PROFILE
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub fn name(&self) -> &'static str {
        NAME
    }

    pub fn vendor(&self) -> &'static str {
        VENDOR
    }

    /// Every device of the platform.
    pub fn devices(&self) -> &[Device] {
        &self.0.devices
    }

    /// The devices matching a type mask.
    pub fn devices_by_type(&self, ty: DeviceType) -> Result<Vec<Device>> {
        let matched: Vec<Device> = self
            .0
            .devices
            .iter()
            .filter(|d| ty.intersects(d.device_type() | DeviceType::DEFAULT))
            .cloned()
            .collect();

        if matched.is_empty() {
            return err(Status::InvalidDevice, "no device matches the requested type");
        }

        Ok(matched)
    }

    pub(crate) fn owns_device(&self, device: &Device) -> bool {
        self.0.devices.iter().any(|d| d.same_device(device))
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("profile", &PROFILE)
            .field("version", &VERSION)
            .field("devices", &self.0.devices.len())
            .finish()
    }
}

pub struct PlatformBuilder {
    frontend: Option<Arc<dyn Frontend>>,
    topology: Option<hw::Topology>,
}

impl PlatformBuilder {
    /// Injects the compile service all CPU devices use. Without one the
    /// platform reports no compiler and every program build fails.
    pub fn frontend(mut self, frontend: Arc<dyn Frontend>) -> PlatformBuilder {
        self.frontend = Some(frontend);
        self
    }

    /// Overrides hardware detection, mostly for embedders and tests that
    /// want a fixed machine shape.
    pub fn topology(mut self, topology: hw::Topology) -> PlatformBuilder {
        self.topology = Some(topology);
        self
    }

    pub fn build(self) -> Result<Platform> {
        let compiler_available = self.frontend.is_some();
        let frontend = self
            .frontend
            .unwrap_or_else(|| Arc::new(NullFrontend::default()));
        let topology = self.topology.unwrap_or_else(hw::detect);

        if topology.nodes.is_empty() {
            return err(Status::InvalidValue, "topology reports no nodes");
        }

        let devices = topology
            .nodes
            .iter()
            .enumerate()
            .map(|(id, node)| {
                Device(CpuDevice::new(
                    id as u64,
                    node,
                    Arc::clone(&frontend),
                    compiler_available,
                ))
            })
            .collect();

        Ok(Platform(Arc::new(PlatformInner { devices })))
    }
}
