//! The compile service consumed by devices.
//!
//! The front-end proper (parsing a C-dialect kernel source down to callable
//! code) lives outside this crate. What the runtime needs from it is the
//! `Frontend` trait and the shape of its output: a [`KernelModule`] holding
//! kernel definitions with the packed-argument entry ABI, the per-argument
//! address-space metadata the argument setter validates against, a declared
//! call graph for the pre-dispatch forest check, external symbol names to
//! resolve against the device builtin library, and the module's static
//! constructors and destructors.

use std::os::raw::c_void;
use std::sync::Arc;

use crate::dims::MAX_WORK_DIMS;
use crate::error::{err, Result, Status};

/// The packed-argument kernel ABI: one opaque slot per declared argument.
/// Pointer arguments are stored directly in their slot; by-value arguments
/// are stored as a pointer to the value bytes.
pub type KernelFn = unsafe extern "C" fn(args: *const *mut c_void);

/// A module-level static constructor or destructor.
pub type InitFn = fn();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressSpace {
    Global,
    Constant,
    Local,
    /// Not a pointer: the argument is passed by value.
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArgInfo {
    pub address_space: AddressSpace,
}

impl ArgInfo {
    pub fn new(address_space: AddressSpace) -> ArgInfo {
        ArgInfo { address_space }
    }
}

/// Per-work-item memory footprint estimates, used to clamp the maximum
/// work-group size against device private memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Footprint {
    pub private_memory: usize,
    pub local_memory: usize,
}

pub struct KernelDef {
    pub name: String,
    pub args: Vec<ArgInfo>,
    pub entry: KernelFn,
    /// Names of functions this kernel calls, directly.
    pub callees: Vec<String>,
    pub required_work_group_size: Option<[usize; MAX_WORK_DIMS]>,
    pub footprint: Footprint,
}

impl KernelDef {
    /// Two definitions are link-compatible when their argument lists agree.
    pub fn signature_matches(&self, other: &KernelDef) -> bool {
        self.args == other.args
    }
}

/// A non-kernel function defined inside a module, tracked only for call
/// graph validation.
pub struct FunctionDef {
    pub name: String,
    pub callees: Vec<String>,
}

#[derive(Default)]
pub struct KernelModule {
    pub kernels: Vec<KernelDef>,
    pub functions: Vec<FunctionDef>,
    /// Symbols the module expects the device builtin library to provide.
    pub externals: Vec<String>,
    pub constructors: Vec<InitFn>,
    pub destructors: Vec<InitFn>,
}

impl KernelModule {
    pub fn kernel(&self, name: &str) -> Option<&KernelDef> {
        self.kernels.iter().find(|k| k.name == name)
    }

    fn callees_of(&self, name: &str) -> Option<&[String]> {
        if let Some(f) = self.functions.iter().find(|f| f.name == name) {
            return Some(&f.callees);
        }
        self.kernels
            .iter()
            .find(|k| k.name == name)
            .map(|k| k.callees.as_slice())
    }

    fn is_external(&self, name: &str) -> bool {
        self.externals.iter().any(|e| e == name)
    }

    /// Checks that the call graph reachable from `kernel` is a forest:
    /// every callee resolves (in-module or external) and no call path
    /// revisits a function. Recursion and unresolved indirect calls make a
    /// kernel impossible to fully inline and are rejected before dispatch.
    pub fn validate_call_graph(&self, kernel: &str) -> Result<()> {
        let def = match self.kernel(kernel) {
            Some(def) => def,
            None => return err(Status::InvalidKernelName, "no such kernel in module"),
        };

        let mut path = vec![def.name.clone()];
        self.walk(&def.name, &mut path)
    }

    fn walk(&self, name: &str, path: &mut Vec<String>) -> Result<()> {
        let callees = match self.callees_of(name) {
            Some(c) => c,
            None => return Ok(()),
        };

        for callee in callees {
            if path.iter().any(|seen| seen == callee) {
                return err(
                    Status::BuildProgramFailure,
                    format!("recursive call to '{}' cannot be inlined", callee),
                );
            }

            if self.callees_of(callee).is_some() {
                path.push(callee.clone());
                self.walk(callee, path)?;
                path.pop();
            } else if !self.is_external(callee) {
                return err(
                    Status::BuildProgramFailure,
                    format!("call to unresolved function '{}'", callee),
                );
            }
        }

        Ok(())
    }
}

/// The opaque "compile source to module" collaborator.
///
/// Diagnostics belong in `log`, which the caller stores into the program's
/// per-device build information.
pub trait Frontend: Send + Sync {
    fn compile(&self, source: &str, options: &str, log: &mut String) -> Result<Arc<KernelModule>>;
}

/// A front-end for devices without a compiler: every build fails.
#[derive(Debug, Default)]
pub struct NullFrontend;

impl Frontend for NullFrontend {
    fn compile(&self, _source: &str, _options: &str, log: &mut String) -> Result<Arc<KernelModule>> {
        log.push_str("no compiler is available for this device\n");
        err(Status::BuildProgramFailure, "no compiler available")
    }
}
