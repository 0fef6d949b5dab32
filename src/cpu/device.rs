//! The CPU device: multiprocessors, the global arena, the kernel engine,
//! and the submit paths that turn queue commands into worker commands.

use std::os::raw::c_void;
use std::ptr;
use std::sync::Arc;

use crate::cpu::command::{
    self, CopyIn, CopyOut, ExecCommand, ExecKind, NDRangeBlock, NativeCall, ResultRecorder,
    ServiceCommand, WorkerCommand,
};
use crate::cpu::engine::KernelEngine;
use crate::cpu::memory::GlobalMemory;
use crate::cpu::multiprocessor::Multiprocessor;
use crate::cpu::worker;
use crate::dims::DimensionInfo;
use crate::error::{Error, Result, Status};
use crate::frontend::{Frontend, KernelFn, KernelModule};
use crate::hw;
use crate::profile::{profiler, SampleLabel};
use crate::standard::buffer::{Buffer, MemId};
use crate::standard::command::{Command, CommandKind};
use crate::standard::device::DeviceInfo;
use crate::standard::event::Event;
use crate::standard::kernel::{Kernel, KernelArg};
use crate::sys::{self, Rendezvous};

pub(crate) enum SubmitOutcome {
    Accepted,
    Failed(Error),
}

pub struct CpuDevice {
    id: u64,
    info: DeviceInfo,
    frontend: Arc<dyn Frontend>,
    global: GlobalMemory,
    mps: Vec<Multiprocessor>,
    engine: KernelEngine,
}

impl CpuDevice {
    pub(crate) fn new(
        id: u64,
        node: &hw::Node,
        frontend: Arc<dyn Frontend>,
        compiler_available: bool,
    ) -> Arc<CpuDevice> {
        let llc = node.first_llc();
        let line_size = llc.map(|c| c.line_size).unwrap_or(64);
        let cache_size = llc.map(|c| c.size).unwrap_or(0);

        let info = DeviceInfo {
            name: "CPU".to_string(),
            vendor: "clrun".to_string(),
            max_compute_units: node.cpu_count().max(1),
            max_work_item_dimensions: 3,
            max_work_item_sizes: [1024; 3],
            max_work_group_size: 1024,
            max_mem_alloc_size: node.memory_size,
            global_mem_size: node.memory_size,
            global_mem_cacheline_size: line_size,
            global_mem_cache_size: cache_size,
            local_mem_size: cache_size,
            private_mem_size: cache_size,
            size_type_max: usize::MAX,
            compiler_available,
            host_unified_memory: true,
            can_exec_kernel: true,
            can_exec_native_kernel: true,
        };

        let mps = node.llc_groups.iter().map(Multiprocessor::new).collect();

        Arc::new(CpuDevice {
            id,
            info,
            frontend,
            global: GlobalMemory::new(node.memory_size, line_size),
            mps,
            engine: KernelEngine::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub(crate) fn global_memory(&self) -> &GlobalMemory {
        &self.global
    }

    // ---- memory object lifecycle -------------------------------------

    pub(crate) fn create_arena_buffer(
        &self,
        id: MemId,
        size: usize,
        init: Option<&[u8]>,
    ) -> Result<()> {
        self.global.alloc(id, size, init).map(|_| ())
    }

    pub(crate) fn register_host_buffer(&self, id: MemId, ptr: *mut u8) {
        self.global.register_external(id, ptr);
    }

    pub(crate) fn free_buffer(&self, id: MemId) {
        self.global.free(id);
    }

    // ---- program building --------------------------------------------

    pub(crate) fn translate(
        &self,
        source: &str,
        options: &str,
        log: &mut String,
    ) -> Result<Arc<KernelModule>> {
        let mut full = sys::env("CLRUN_COMPILER_OPTIONS").unwrap_or_default();
        if !full.is_empty() && !options.is_empty() {
            full.push(' ');
        }
        full.push_str(options);

        self.frontend.compile(source, full.trim(), log)
    }

    // ---- kernel lifecycle --------------------------------------------

    /// The cached per-group entry for a kernel, materializing on first
    /// use: stub synthesis, module registration, static constructors.
    pub(crate) fn block_parallel_entry(&self, kernel: &Kernel) -> Result<KernelFn> {
        let (module, index) = kernel.code_for(self.id)?;
        let def = &module.kernels[index];

        self.engine
            .resolve_entry(kernel.id(), &module, def, |m| self.run_initializers(m, true))
    }

    /// Mirror flow of kernel release: static destructors, module removal,
    /// cache eviction.
    pub(crate) fn unregister_kernel(&self, kernel_id: u64, module: &Arc<KernelModule>) {
        if !module.destructors.is_empty() {
            self.run_initializers(module, false);
        }
        self.engine.evict(kernel_id, module);
    }

    fn run_initializers(&self, module: &Arc<KernelModule>, constructors: bool) {
        let invoke = |module: &Arc<KernelModule>| {
            let fns = if constructors {
                &module.constructors
            } else {
                &module.destructors
            };
            for f in fns {
                f();
            }
        };

        // On a worker thread the service command would queue behind the
        // command being executed and the rendezvous would never meet.
        if worker::with_current_ctx(|c| c.is_some()) {
            invoke(module);
            return;
        }

        let sync = Arc::new(Rendezvous::new());
        let cmd = if constructors {
            ServiceCommand::RunConstructors {
                module: Arc::clone(module),
                sync: Arc::clone(&sync),
            }
        } else {
            ServiceCommand::RunDestructors {
                module: Arc::clone(module),
                sync: Arc::clone(&sync),
            }
        };

        match self.mps[0].submit(WorkerCommand::Service(cmd)) {
            // No worker accepting: critical, run on the current thread.
            Err(_) => invoke(module),
            Ok(()) => sync.wait(),
        }
    }

    // ---- command submission ------------------------------------------

    /// Submits a popped queue command. `Accepted` consumes the command;
    /// `Failed` reports a validation or materialization error the queue
    /// records on the notify event.
    pub(crate) fn submit(&self, cmd: Command) -> SubmitOutcome {
        let event = cmd.event.clone();
        let profiled = event.is_profiled();

        // Taken first so this sample orders before any worker sample.
        let sample = profiler().sample(profiled, SampleLabel::CommandSubmitted, None);

        let outcome = match cmd.kind {
            CommandKind::ReadBuffer {
                buf,
                offset,
                size,
                dst,
            } => self.submit_read(&event, buf, offset, size, dst),
            CommandKind::WriteBuffer { buf, offset, data } => {
                self.submit_write(&event, buf, offset, data)
            }
            CommandKind::NDRangeKernel { kernel, dims } => {
                self.submit_ndrange(&event, kernel, dims)
            }
            CommandKind::NativeKernel {
                func,
                args,
                mappings,
            } => self.submit_native(&event, func, args, mappings),
        };

        if let SubmitOutcome::Accepted = outcome {
            event.mark_submitted(sample);
        }

        outcome
    }

    fn single_exec(&self, event: &Event, kind: ExecKind) -> SubmitOutcome {
        let cmd = ExecCommand {
            event: event.clone(),
            recorder: Arc::new(ResultRecorder::new(1)),
            sub_id: None,
            kind,
        };

        if let Err(WorkerCommand::Exec(cmd)) = self.mps[0].submit(WorkerCommand::Exec(cmd)) {
            log::warn!("no worker accepted a command; failing its event");
            command::complete(cmd, command::rejected_status());
        }

        SubmitOutcome::Accepted
    }

    fn submit_read(
        &self,
        event: &Event,
        buf: Buffer,
        offset: usize,
        size: usize,
        dst: *mut u8,
    ) -> SubmitOutcome {
        let src = self.global.get(buf.id());
        if src.is_null() {
            return SubmitOutcome::Failed(Error::new(
                Status::InvalidMemObject,
                "read source has no device storage",
            ));
        }

        self.single_exec(
            event,
            ExecKind::ReadBuffer(CopyOut {
                dst,
                src: unsafe { src.add(offset) as *const u8 },
                size,
                _buf: buf,
            }),
        )
    }

    fn submit_write(
        &self,
        event: &Event,
        buf: Buffer,
        offset: usize,
        data: Vec<u8>,
    ) -> SubmitOutcome {
        let dst = self.global.get(buf.id());
        if dst.is_null() {
            return SubmitOutcome::Failed(Error::new(
                Status::InvalidMemObject,
                "write target has no device storage",
            ));
        }

        self.single_exec(
            event,
            ExecKind::WriteBuffer(CopyIn {
                dst: unsafe { dst.add(offset) },
                data,
                _buf: buf,
            }),
        )
    }

    fn submit_ndrange(
        &self,
        event: &Event,
        kernel: Kernel,
        mut dims: DimensionInfo,
    ) -> SubmitOutcome {
        let entry = match self.block_parallel_entry(&kernel) {
            Ok(entry) => entry,
            Err(e) => return SubmitOutcome::Failed(e),
        };

        // No local size given: one work-group spanning the whole range.
        if !dims.local_specified() {
            let sizes: Vec<usize> = (0..dims.work_dim()).map(|i| dims.global_size(i)).collect();
            dims.set_local_sizes(&sizes);
        }

        let template = match self.marshal_args(&kernel) {
            Ok(t) => t,
            Err(e) => return SubmitOutcome::Failed(e),
        };

        let recorder = Arc::new(ResultRecorder::new(dims.work_groups()));
        let group_size = dims.local_items();
        let end = dims.iter_end();

        let mut it = dims.iter();
        let mut mp = 0;
        let mut sub_id = 0u32;

        while it != end {
            let next = it.advanced(group_size);

            let cmd = ExecCommand {
                event: event.clone(),
                recorder: Arc::clone(&recorder),
                sub_id: Some(sub_id),
                kind: ExecKind::NDRangeBlock(NDRangeBlock {
                    entry,
                    slots: template.slots.clone(),
                    _values: Arc::clone(&template.values),
                    locals: template.locals.clone(),
                    begin: it,
                    end: next.clone(),
                    _kernel: kernel.clone(),
                }),
            };

            if let Err(WorkerCommand::Exec(cmd)) = self.mps[mp].submit(WorkerCommand::Exec(cmd)) {
                log::warn!("work-group block rejected; accounting it as failed");
                command::complete(cmd, command::rejected_status());
            }

            mp = (mp + 1) % self.mps.len();
            sub_id += 1;
            it = next;
        }

        SubmitOutcome::Accepted
    }

    fn submit_native(
        &self,
        event: &Event,
        func: command::NativeFn,
        args: Box<[u8]>,
        mappings: Vec<(Buffer, usize)>,
    ) -> SubmitOutcome {
        let table = self.global.snapshot();
        let mut args = args;
        let mut buffers = Vec::with_capacity(mappings.len());

        // Patch each registered pointer slot with the buffer's device
        // address, null when the buffer has no storage here.
        for (buf, offset) in mappings {
            let addr = table.get(&buf.id()).copied().unwrap_or(ptr::null_mut());
            let bytes = (addr as usize).to_ne_bytes();
            args[offset..offset + bytes.len()].copy_from_slice(&bytes);
            buffers.push(buf);
        }

        self.single_exec(
            event,
            ExecKind::Native(NativeCall {
                func,
                args,
                _buffers: buffers,
            }),
        )
    }

    fn marshal_args(&self, kernel: &Kernel) -> Result<ArgsTemplate> {
        let args = kernel.args_snapshot();

        let mut slots = vec![ptr::null_mut(); args.len()];
        let mut values: Vec<Box<[u8]>> = Vec::new();
        let mut locals = Vec::new();

        for (i, arg) in args.into_iter().enumerate() {
            match arg {
                None => {
                    return Err(Error::new(
                        Status::InvalidKernelArgs,
                        "not all kernel arguments have been specified",
                    ))
                }
                Some(KernelArg::Buffer { mem: Some(buf) }) => {
                    slots[i] = self.global.get(buf.id()) as *mut c_void;
                }
                Some(KernelArg::Buffer { mem: None }) => {}
                Some(KernelArg::Local { size }) => locals.push((i, size)),
                Some(KernelArg::Value(bytes)) => {
                    slots[i] = bytes.as_ptr() as *mut c_void;
                    values.push(bytes);
                }
            }
        }

        Ok(ArgsTemplate {
            slots,
            values: Arc::new(values),
            locals,
        })
    }
}

struct ArgsTemplate {
    slots: Vec<*mut c_void>,
    values: Arc<Vec<Box<[u8]>>>,
    locals: Vec<(usize, usize)>,
}
