//! A program: source plus per-device build state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{err, Error, Result, Status};
use crate::frontend::KernelModule;
use crate::standard::context::Context;
use crate::standard::device::Device;
use crate::standard::kernel::Kernel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStatus {
    None,
    InProgress,
    Success,
    Error,
}

/// The build record a program keeps per device.
pub struct BuildInformation {
    status: BuildStatus,
    log: String,
    options: String,
    module: Option<Arc<KernelModule>>,
}

impl BuildInformation {
    fn new() -> BuildInformation {
        BuildInformation {
            status: BuildStatus::None,
            log: String::new(),
            options: String::new(),
            module: None,
        }
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub(crate) fn module(&self) -> Option<&Arc<KernelModule>> {
        self.module.as_ref()
    }

    fn is_built(&self) -> bool {
        self.status == BuildStatus::Success
    }
}

struct ProgramState {
    builds: Vec<(Device, BuildInformation)>,
    attached_kernels: Vec<u64>,
}

/// Called when a build request finishes, successfully or not.
pub type BuildCallback = Box<dyn FnOnce(&Program) + Send>;

#[derive(Clone)]
pub struct Program(Arc<ProgramInner>);

pub(crate) struct ProgramInner {
    ctx: Context,
    source: String,
    state: Mutex<ProgramState>,
}

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

impl Program {
    /// Creates a program from one source string.
    pub fn with_source(ctx: &Context, source: &str) -> Result<Program> {
        Program::with_sources(ctx, &[source])
    }

    /// Creates a program from several source fragments, concatenated in
    /// order.
    pub fn with_sources(ctx: &Context, sources: &[&str]) -> Result<Program> {
        if sources.is_empty() {
            return err(Status::InvalidValue, "no program source given");
        }

        let mut buf = String::new();
        for src in sources {
            buf.push_str(src);
            buf.push('\n');
        }

        Ok(Program(Arc::new(ProgramInner {
            ctx: ctx.clone(),
            source: buf,
            state: Mutex::new(ProgramState {
                builds: Vec::new(),
                attached_kernels: Vec::new(),
            }),
        })))
    }

    pub fn context(&self) -> &Context {
        &self.0.ctx
    }

    pub fn source(&self) -> &str {
        &self.0.source
    }

    fn lock(&self) -> MutexGuard<ProgramState> {
        self.0.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Builds the program for `devices` (every context device when the
    /// list is empty), stopping at the first failing device. The callback
    /// runs once the whole request settled.
    pub fn build(
        &self,
        devices: &[Device],
        options: &str,
        notify: Option<BuildCallback>,
    ) -> Result<()> {
        let targets: Vec<Device> = if devices.is_empty() {
            self.0.ctx.devices().to_vec()
        } else {
            devices.to_vec()
        };

        let mut result = Ok(());
        for dev in &targets {
            result = self.build_one(dev, options);
            if result.is_err() {
                break;
            }
        }

        // No concurrent builds to wait out; the request is settled here.
        if let Some(cb) = notify {
            cb(self);
        }

        result
    }

    fn build_one(&self, dev: &Device, options: &str) -> Result<()> {
        if !self.0.ctx.is_associated_with(dev) {
            self.0
                .ctx
                .report_diagnostic("device not associated with build context");
            return Err(Error::new(
                Status::InvalidDevice,
                "device not associated with build context",
            ));
        }

        {
            let mut state = self.lock();

            if !state.attached_kernels.is_empty() {
                self.0
                    .ctx
                    .report_diagnostic("cannot build a program with attached kernels");
                return Err(Error::new(
                    Status::InvalidOperation,
                    "cannot build a program with attached kernels",
                ));
            }

            let info = Self::build_info_mut(&mut state, dev);
            if info.status == BuildStatus::InProgress {
                self.0
                    .ctx
                    .report_diagnostic("previously started build not yet terminated");
                return Err(Error::new(
                    Status::InvalidOperation,
                    "previously started build not yet terminated",
                ));
            }
            info.status = BuildStatus::InProgress;
        }

        // Compile without holding the program lock; concurrent build
        // attempts observe `InProgress` and fail.
        let mut build_log = String::new();
        let compiled = dev
            .cpu()
            .translate(&self.0.source, options, &mut build_log);

        let mut state = self.lock();
        let info = Self::build_info_mut(&mut state, dev);
        info.log = build_log;
        info.options = options.to_string();

        match compiled {
            Ok(module) => {
                info.module = Some(module);
                info.status = BuildStatus::Success;
                log::debug!("program built for device '{}'", dev.name());
                Ok(())
            }
            Err(_) => {
                info.module = None;
                info.status = BuildStatus::Error;
                log::warn!("program build failed for device '{}'", dev.name());
                Err(Error::new(
                    Status::BuildProgramFailure,
                    "program build failed; consult the build log",
                ))
            }
        }
    }

    fn build_info_mut<'a>(
        state: &'a mut ProgramState,
        dev: &Device,
    ) -> &'a mut BuildInformation {
        if let Some(at) = state.builds.iter().position(|(d, _)| d.same_device(dev)) {
            return &mut state.builds[at].1;
        }

        state.builds.push((dev.clone(), BuildInformation::new()));
        &mut state.builds.last_mut().unwrap().1
    }

    pub fn build_status(&self, dev: &Device) -> BuildStatus {
        self.lock()
            .builds
            .iter()
            .find(|(d, _)| d.same_device(dev))
            .map(|(_, info)| info.status)
            .unwrap_or(BuildStatus::None)
    }

    pub fn build_log(&self, dev: &Device) -> String {
        self.lock()
            .builds
            .iter()
            .find(|(d, _)| d.same_device(dev))
            .map(|(_, info)| info.log.clone())
            .unwrap_or_default()
    }

    pub fn is_built_for(&self, dev: &Device) -> bool {
        self.build_status(dev) == BuildStatus::Success
    }

    /// Creates a kernel by name.
    ///
    /// The kernel binds the compiled code of every device the program is
    /// built for; definitions must agree on their signature across
    /// devices.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        let mut state = self.lock();

        if !state.builds.iter().any(|(_, info)| info.is_built()) {
            self.0.ctx.report_diagnostic("no program has been built");
            return Err(Error::new(
                Status::InvalidProgramExecutable,
                "no program has been built",
            ));
        }

        let mut codes: Vec<(Device, Arc<KernelModule>, usize)> = Vec::new();
        let mut reference: Option<(Arc<KernelModule>, usize)> = None;

        for (dev, info) in &state.builds {
            let module = match (info.is_built(), info.module()) {
                (true, Some(m)) => m,
                _ => continue,
            };

            let index = match module.kernels.iter().position(|k| k.name == name) {
                Some(i) => i,
                None => continue,
            };

            match &reference {
                Some((ref_module, ref_index)) => {
                    let reference_def = &ref_module.kernels[*ref_index];
                    if !module.kernels[index].signature_matches(reference_def) {
                        self.0
                            .ctx
                            .report_diagnostic("kernel signatures do not match across devices");
                        return Err(Error::new(
                            Status::InvalidKernelDefinition,
                            "kernel signatures do not match across devices",
                        ));
                    }
                }
                None => reference = Some((Arc::clone(module), index)),
            }

            codes.push((dev.clone(), Arc::clone(module), index));
        }

        if codes.is_empty() {
            self.0.ctx.report_diagnostic("no kernel definition");
            return Err(Error::new(Status::InvalidKernelName, "no kernel definition"));
        }

        let id = NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed);
        state.attached_kernels.push(id);

        Ok(Kernel::new(id, name.to_string(), self.clone(), codes))
    }

    pub(crate) fn unregister_kernel(&self, id: u64) {
        self.lock().attached_kernels.retain(|&k| k != id);
    }

    /// Number of kernels currently created from this program.
    pub fn attached_kernel_count(&self) -> usize {
        self.lock().attached_kernels.len()
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("source_len", &self.0.source.len())
            .finish()
    }
}
