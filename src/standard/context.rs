//! A context: a set of devices plus the diagnostic fabric.

use std::sync::Arc;

use crate::error::{err, Result, Status};
use crate::standard::buffer::{BufferBuilder, MemId};
use crate::standard::device::Device;
use crate::standard::platform::Platform;
use crate::sys;

pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Groups one or more devices; the factory for queues, buffers and
/// programs. Clones share the context.
#[derive(Clone)]
pub struct Context(pub(crate) Arc<ContextInner>);

pub(crate) struct ContextInner {
    devices: Vec<Device>,
    callback: Option<ErrorCallback>,
    mirror_diagnostics: bool,
}

impl Context {
    /// Creates a context over `devices`, all of which must belong to
    /// `platform`. The callback, when given, receives every diagnostic
    /// the runtime reports against this context.
    pub fn new(
        platform: &Platform,
        devices: &[Device],
        callback: Option<ErrorCallback>,
    ) -> Result<Context> {
        if devices.is_empty() {
            return err(Status::InvalidValue, "context needs at least one device");
        }

        for dev in devices {
            if !platform.owns_device(dev) {
                return err(
                    Status::InvalidDevice,
                    "device does not belong to the platform",
                );
            }
        }

        Ok(Context(Arc::new(ContextInner {
            devices: devices.to_vec(),
            callback,
            mirror_diagnostics: sys::has_env("CLRUN_INTERNAL_DIAGNOSTIC"),
        })))
    }

    pub fn devices(&self) -> &[Device] {
        &self.0.devices
    }

    pub fn is_associated_with(&self, device: &Device) -> bool {
        self.0.devices.iter().any(|d| d.same_device(device))
    }

    pub(crate) fn same_context(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Starts building a buffer of `size` bytes in this context.
    pub fn buffer_builder<'a>(&self, size: usize) -> BufferBuilder<'a> {
        BufferBuilder::new(self.clone(), size)
    }

    /// Reports a diagnostic: logged, optionally mirrored to stderr, and
    /// forwarded to the user callback.
    pub(crate) fn report_diagnostic(&self, msg: &str) {
        log::error!("{}", msg);

        if self.0.mirror_diagnostics {
            eprintln!("clrun: {}", msg);
        }

        if let Some(cb) = &self.0.callback {
            cb(msg);
        }
    }

    pub(crate) fn destroy_memory_obj(&self, id: MemId) {
        for dev in &self.0.devices {
            dev.cpu().free_buffer(id);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("devices", &self.0.devices.len())
            .finish()
    }
}
