//! The kernel engine: the code-generation counterpart of the device.
//!
//! Registered modules have their external symbols resolved against the
//! builtin library; kernels are materialized once per (kernel, device)
//! pair into a cached group-parallel entry, with the module's static
//! constructors run on a worker thread before the entry is published.

use std::collections::HashMap;
use std::os::raw::c_void;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cpu::builtins;
use crate::cpu::worker;
use crate::error::{err, Error, Result, Status};
use crate::frontend::{KernelDef, KernelFn, KernelModule};
use crate::sys::Rendezvous;

/// The per-work-group stub: runs one work-item of the current block's
/// kernel, then the implicit end-of-work-item barrier. Every work-item
/// stack of a bank is seeded with this entry; the kernel to call is read
/// from the executing worker's block context.
pub(crate) unsafe extern "C" fn group_parallel_stub(args: *const *mut c_void) {
    let entry = worker::with_current_ctx(|ctx| {
        let ctx = ctx.expect("group stub outside a worker");
        ctx.block.as_ref().expect("group stub outside a block").entry
    });

    entry(args);

    builtins::barrier(builtins::MemFenceFlags::empty());
}

enum EntryState {
    Building(Arc<Rendezvous>),
    Ready(KernelFn),
    Failed(Error),
}

struct EngineState {
    modules: Vec<Arc<KernelModule>>,
    entries: HashMap<u64, EntryState>,
}

pub(crate) struct KernelEngine {
    builtins: HashMap<&'static str, usize>,
    state: Mutex<EngineState>,
}

impl KernelEngine {
    pub fn new() -> KernelEngine {
        KernelEngine {
            builtins: builtins::library().iter().copied().collect(),
            state: Mutex::new(EngineState {
                modules: Vec::new(),
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add_module(&self, state: &mut EngineState, module: &Arc<KernelModule>) -> Result<()> {
        if state.modules.iter().any(|m| Arc::ptr_eq(m, module)) {
            return Ok(());
        }

        for external in &module.externals {
            if !self.builtins.contains_key(external.as_str()) {
                return err(
                    Status::BuildProgramFailure,
                    format!("unresolved external symbol '{}'", external),
                );
            }
        }

        state.modules.push(Arc::clone(module));
        Ok(())
    }

    /// Resolves the group-parallel entry for a kernel, materializing it on
    /// first use. `run_initializers` is invoked exactly once per
    /// materialization, outside any engine lock, after the module checks
    /// passed and before the entry becomes visible.
    pub fn resolve_entry(
        &self,
        kernel_id: u64,
        module: &Arc<KernelModule>,
        def: &KernelDef,
        run_initializers: impl FnOnce(&Arc<KernelModule>),
    ) -> Result<KernelFn> {
        let sync = Arc::new(Rendezvous::new());

        loop {
            let waiting = {
                let mut state = self.lock();
                match state.entries.get(&kernel_id) {
                    Some(EntryState::Ready(entry)) => return Ok(*entry),
                    Some(EntryState::Failed(e)) => return Err(e.clone()),
                    Some(EntryState::Building(other)) => Some(Arc::clone(other)),
                    None => {
                        state
                            .entries
                            .insert(kernel_id, EntryState::Building(Arc::clone(&sync)));
                        None
                    }
                }
            };

            match waiting {
                Some(other) => other.wait(),
                None => break,
            }
        }

        // This thread owns the materialization.
        let built: Result<KernelFn> = (|| {
            module.validate_call_graph(&def.name)?;

            let mut state = self.lock();
            self.add_module(&mut state, module)?;

            Ok(def.entry)
        })();

        if built.is_ok() {
            run_initializers(module);
        }

        let mut state = self.lock();
        let published = match &built {
            Ok(entry) => EntryState::Ready(*entry),
            Err(e) => EntryState::Failed(e.clone()),
        };
        state.entries.insert(kernel_id, published);
        drop(state);
        sync.signal();

        built
    }

    /// Drops the cached entry for a kernel and unregisters its module.
    pub fn evict(&self, kernel_id: u64, module: &Arc<KernelModule>) {
        let mut state = self.lock();
        state.entries.remove(&kernel_id);
        state.modules.retain(|m| !Arc::ptr_eq(m, module));
    }

    /// Whether the kernel already has a materialized entry.
    #[cfg(test)]
    pub fn is_materialized(&self, kernel_id: u64) -> bool {
        matches!(self.lock().entries.get(&kernel_id), Some(EntryState::Ready(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{ArgInfo, Footprint};

    unsafe extern "C" fn nop(_args: *const *mut c_void) {}

    fn module(externals: Vec<String>) -> Arc<KernelModule> {
        Arc::new(KernelModule {
            kernels: vec![KernelDef {
                name: "k".into(),
                args: Vec::<ArgInfo>::new(),
                entry: nop,
                callees: Vec::new(),
                required_work_group_size: None,
                footprint: Footprint::default(),
            }],
            functions: Vec::new(),
            externals,
            constructors: Vec::new(),
            destructors: Vec::new(),
        })
    }

    #[test]
    fn materialization_is_cached_and_runs_initializers_once() {
        let engine = KernelEngine::new();
        let module = module(vec!["barrier".into()]);
        let def = &module.kernels[0];

        let mut runs = 0;
        engine
            .resolve_entry(7, &module, def, |_| runs += 1)
            .unwrap();
        assert!(engine.is_materialized(7));

        engine
            .resolve_entry(7, &module, def, |_| runs += 1)
            .unwrap();
        assert_eq!(runs, 1);
    }

    #[test]
    fn unresolved_externals_fail_materialization() {
        let engine = KernelEngine::new();
        let module = module(vec!["definitely_not_a_builtin".into()]);
        let def = &module.kernels[0];

        let e = engine.resolve_entry(9, &module, def, |_| {}).unwrap_err();
        assert_eq!(e.api_status(), Status::BuildProgramFailure);

        // The failure is latched.
        let e2 = engine.resolve_entry(9, &module, def, |_| {}).unwrap_err();
        assert_eq!(e2.api_status(), Status::BuildProgramFailure);
    }

    #[test]
    fn eviction_clears_the_cache() {
        let engine = KernelEngine::new();
        let module = module(Vec::new());
        let def = &module.kernels[0];

        engine.resolve_entry(3, &module, def, |_| {}).unwrap();
        engine.evict(3, &module);
        assert!(!engine.is_materialized(3));
    }
}
