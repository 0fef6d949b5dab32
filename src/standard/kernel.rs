//! A kernel: compiled code handles plus its argument slots.

use std::sync::{Arc, Mutex};

use crate::error::{err, Error, Result, Status};
use crate::frontend::{AddressSpace, KernelDef, KernelModule};
use crate::standard::buffer::Buffer;
use crate::standard::context::Context;
use crate::standard::device::Device;
use crate::standard::program::Program;
use crate::util::ClPrm;

/// One bound argument slot.
#[derive(Clone)]
pub(crate) enum KernelArg {
    /// A global or constant buffer; `None` passes a null device pointer.
    Buffer { mem: Option<Buffer> },
    /// A local-memory allocation of the given size, carved per block.
    Local { size: usize },
    /// By-value bytes, copied at set time.
    Value(Box<[u8]>),
}

/// A kernel handle. Clones share the kernel, including its argument
/// slots; setting an argument is visible to every clone.
#[derive(Clone)]
pub struct Kernel(Arc<KernelInner>);

pub(crate) struct KernelInner {
    id: u64,
    name: String,
    program: Program,
    codes: Vec<(Device, Arc<KernelModule>, usize)>,
    args: Mutex<Vec<Option<KernelArg>>>,
}

impl Kernel {
    pub(crate) fn new(
        id: u64,
        name: String,
        program: Program,
        codes: Vec<(Device, Arc<KernelModule>, usize)>,
    ) -> Kernel {
        let arg_count = codes
            .first()
            .map(|(_, module, index)| module.kernels[*index].args.len())
            .unwrap_or(0);

        Kernel(Arc::new(KernelInner {
            id,
            name,
            program,
            codes,
            args: Mutex::new(vec![None; arg_count]),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn program(&self) -> &Program {
        &self.0.program
    }

    pub fn context(&self) -> &Context {
        self.0.program.context()
    }

    pub fn num_args(&self) -> usize {
        self.def().args.len()
    }

    pub(crate) fn id(&self) -> u64 {
        self.0.id
    }

    /// The reference definition; all devices share one signature.
    fn def(&self) -> &KernelDef {
        let (_, module, index) = &self.0.codes[0];
        &module.kernels[*index]
    }

    fn def_for(&self, dev: &Device) -> Option<&KernelDef> {
        self.0
            .codes
            .iter()
            .find(|(d, _, _)| d.same_device(dev))
            .map(|(_, module, index)| &module.kernels[*index])
    }

    pub fn is_built_for(&self, dev: &Device) -> bool {
        self.0.codes.iter().any(|(d, _, _)| d.same_device(dev))
    }

    pub(crate) fn code_for(&self, device_id: u64) -> Result<(Arc<KernelModule>, usize)> {
        self.0
            .codes
            .iter()
            .find(|(d, _, _)| d.cpu().id() == device_id)
            .map(|(_, module, index)| (Arc::clone(module), *index))
            .ok_or_else(|| {
                Error::new(
                    Status::InvalidProgramExecutable,
                    "kernel not built for this device",
                )
            })
    }

    fn arg_space(&self, index: usize) -> Result<AddressSpace> {
        self.def()
            .args
            .get(index)
            .map(|a| a.address_space)
            .ok_or_else(|| {
                Error::new(
                    Status::InvalidArgIndex,
                    "argument number exceeds kernel argument count",
                )
            })
    }

    fn store_arg(&self, index: usize, arg: KernelArg) {
        self.0.args.lock().unwrap_or_else(|e| e.into_inner())[index] = Some(arg);
    }

    /// Binds a buffer to a global or constant pointer argument. `None`
    /// passes a null pointer.
    pub fn set_arg_buffer(&self, index: usize, buf: Option<&Buffer>) -> Result<()> {
        match self.arg_space(index)? {
            AddressSpace::Global | AddressSpace::Constant => {}
            _ => {
                return err(
                    Status::InvalidArgValue,
                    "argument is not a global buffer pointer",
                )
            }
        }

        if let Some(buf) = buf {
            if !buf.context().same_context(self.context()) {
                return err(
                    Status::InvalidMemObject,
                    "buffer and kernel contexts do not match",
                );
            }
        }

        self.store_arg(index, KernelArg::Buffer { mem: buf.cloned() });
        Ok(())
    }

    /// Declares a local-memory argument of `size` bytes; the storage is
    /// carved out of the executing worker's arena per work-group.
    pub fn set_arg_local(&self, index: usize, size: usize) -> Result<()> {
        if self.arg_space(index)? != AddressSpace::Local {
            return err(Status::InvalidArgValue, "argument is not a local pointer");
        }

        if size == 0 {
            return err(Status::InvalidArgSize, "local buffer size unspecified");
        }

        self.store_arg(index, KernelArg::Local { size });
        Ok(())
    }

    /// Binds raw by-value bytes. The declared device-side size is not
    /// knowable on the host, so the length is taken on trust.
    pub fn set_arg_bytes(&self, index: usize, bytes: &[u8]) -> Result<()> {
        if self.arg_space(index)? != AddressSpace::Private {
            return err(Status::InvalidArgValue, "argument is not passed by value");
        }

        if bytes.is_empty() {
            return err(Status::InvalidArgSize, "empty by-value argument");
        }

        self.store_arg(index, KernelArg::Value(bytes.into()));
        Ok(())
    }

    /// Binds a typed by-value argument.
    pub fn set_arg_scalar<T: ClPrm>(&self, index: usize, value: T) -> Result<()> {
        self.set_arg_bytes(index, crate::util::value_bytes(&value))
    }

    pub fn all_args_set(&self) -> bool {
        self.0
            .args
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .all(|a| a.is_some())
    }

    pub(crate) fn args_snapshot(&self) -> Vec<Option<KernelArg>> {
        self.0.args.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ---- work-group queries ------------------------------------------

    pub fn required_work_group_size(&self, dev: &Device) -> Option<[usize; 3]> {
        self.def_for(dev).and_then(|d| d.required_work_group_size)
    }

    /// The fixed work-group size the kernel declares, or zeros.
    pub fn compile_work_group_size(&self, dev: &Device) -> [usize; 3] {
        self.required_work_group_size(dev).unwrap_or([0; 3])
    }

    /// Local memory the kernel itself uses, plus every currently bound
    /// local argument.
    pub fn local_mem_size(&self, dev: &Device) -> usize {
        let footprint = self
            .def_for(dev)
            .map(|d| d.footprint.local_memory)
            .unwrap_or(0);

        let args: usize = self
            .0
            .args
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|a| match a {
                Some(KernelArg::Local { size }) => *size,
                _ => 0,
            })
            .sum();

        footprint + args
    }

    pub fn private_mem_size(&self, dev: &Device) -> usize {
        self.def_for(dev)
            .map(|d| d.footprint.private_memory)
            .unwrap_or(0)
    }

    pub fn preferred_work_group_size_multiple(&self, _dev: &Device) -> usize {
        1
    }

    /// The largest work-group this kernel can run on `dev`: the device
    /// limit, tightened by the private-memory footprint.
    pub fn max_work_group_size(&self, dev: &Device) -> usize {
        let device_max = dev.max_work_group_size();

        match self.def_for(dev).map(|d| d.footprint.private_memory) {
            Some(per_item) if per_item > 0 => {
                (dev.private_mem_size() / per_item).clamp(1, device_max)
            }
            _ => device_max,
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.0.name)
            .field("args", &self.num_args())
            .finish()
    }
}

impl Drop for KernelInner {
    fn drop(&mut self) {
        self.program.unregister_kernel(self.id);

        for (dev, module, _) in &self.codes {
            dev.cpu().unregister_kernel(self.id, module);
        }
    }
}
