//! Memory objects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result, Status};
use crate::standard::context::Context;

bitflags::bitflags! {
    /// Buffer creation flags. The three access flags are mutually
    /// exclusive, as are the three storage flags.
    pub struct MemFlags: u32 {
        const READ_WRITE = 1 << 0;
        const WRITE_ONLY = 1 << 1;
        const READ_ONLY = 1 << 2;
        const USE_HOST_PTR = 1 << 3;
        const ALLOC_HOST_PTR = 1 << 4;
        const COPY_HOST_PTR = 1 << 5;
    }
}

/// Process-unique memory object id; device address tables are keyed by it.
pub type MemId = u64;

static NEXT_MEM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    WriteOnly,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MemKind {
    /// Wraps caller-owned storage; never materialized in a device arena.
    Host,
    /// Arena-backed and host-visible.
    HostAccessible,
    /// Arena-backed, optionally seeded from a host source at creation.
    Device,
}

/// A buffer memory object, shared between the context registry and any
/// kernels referencing it.
#[derive(Clone)]
pub struct Buffer(pub(crate) Arc<BufferInner>);

pub(crate) struct BufferInner {
    id: MemId,
    kind: MemKind,
    size: usize,
    access: Access,
    ctx: Context,
}

impl Buffer {
    pub fn size(&self) -> usize {
        self.0.size
    }

    pub fn access(&self) -> Access {
        self.0.access
    }

    pub fn context(&self) -> &Context {
        &self.0.ctx
    }

    pub(crate) fn id(&self) -> MemId {
        self.0.id
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("size", &self.0.size)
            .field("access", &self.0.access)
            .finish()
    }
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.ctx.destroy_memory_obj(self.id);
    }
}

#[derive(Clone, Copy)]
enum Storage<'a> {
    Unset,
    UseHost(*mut u8),
    AllocHost,
    CopyHost(&'a [u8]),
}

/// Validates and creates a buffer.
///
/// Single use: the first validation failure is latched and returned by
/// `build`.
#[must_use = "builders do nothing until built"]
pub struct BufferBuilder<'a> {
    ctx: Context,
    size: usize,
    access: Option<Access>,
    storage: Storage<'a>,
    err: Option<Error>,
}

impl<'a> BufferBuilder<'a> {
    pub(crate) fn new(ctx: Context, size: usize) -> BufferBuilder<'a> {
        let mut bld = BufferBuilder {
            ctx,
            size,
            access: None,
            storage: Storage::Unset,
            err: None,
        };

        if size == 0 {
            bld.fail(Status::InvalidBufferSize, "buffer size must be greater than 0");
            return bld;
        }

        let ctx = bld.ctx.clone();
        for dev in ctx.devices() {
            if size > dev.max_mem_alloc_size() {
                bld.fail(
                    Status::InvalidBufferSize,
                    "buffer size exceeds device capabilities",
                );
                break;
            }
        }

        bld
    }

    fn fail(&mut self, status: Status, msg: &'static str) {
        if self.err.is_none() {
            self.ctx.report_diagnostic(msg);
            self.err = Some(Error::new(status, msg));
        }
    }

    /// Applies a flag set, as a C binding would hand it over.
    ///
    /// Access and storage flags are unpacked into the corresponding
    /// builder state; `USE_HOST_PTR` and `COPY_HOST_PTR` still need their
    /// pointer or slice supplied separately.
    pub fn flags(mut self, flags: MemFlags) -> BufferBuilder<'a> {
        if flags.contains(MemFlags::READ_WRITE) {
            self = self.read_write();
        }
        if flags.contains(MemFlags::WRITE_ONLY) {
            self = self.write_only();
        }
        if flags.contains(MemFlags::READ_ONLY) {
            self = self.read_only();
        }
        if flags.contains(MemFlags::ALLOC_HOST_PTR) {
            self = self.alloc_host();
        }
        self
    }

    fn set_access(mut self, access: Access) -> BufferBuilder<'a> {
        match self.access {
            None => self.access = Some(access),
            Some(cur) if cur == access => {}
            Some(_) => self.fail(
                Status::InvalidValue,
                "multiple access protection flags not allowed",
            ),
        }
        self
    }

    pub fn read_write(self) -> BufferBuilder<'a> {
        self.set_access(Access::ReadWrite)
    }

    pub fn write_only(self) -> BufferBuilder<'a> {
        self.set_access(Access::WriteOnly)
    }

    pub fn read_only(self) -> BufferBuilder<'a> {
        self.set_access(Access::ReadOnly)
    }

    fn check_storage_unset(&mut self) -> bool {
        if let Storage::Unset = self.storage {
            true
        } else {
            self.fail(
                Status::InvalidValue,
                "multiple buffer storage specifiers not allowed",
            );
            false
        }
    }

    /// Arena-backed, host-visible storage (`ALLOC_HOST_PTR`).
    pub fn alloc_host(mut self) -> BufferBuilder<'a> {
        if self.check_storage_unset() {
            self.storage = Storage::AllocHost;
        }
        self
    }

    /// Seeds the buffer from `src` at creation (`COPY_HOST_PTR`).
    pub fn copy_host_slice(mut self, src: &'a [u8]) -> BufferBuilder<'a> {
        if src.len() < self.size {
            self.fail(
                Status::InvalidHostPtr,
                "initialization data shorter than the buffer",
            );
            return self;
        }
        if self.check_storage_unset() {
            self.storage = Storage::CopyHost(src);
        }
        self
    }

    /// Uses caller-owned storage as the buffer value (`USE_HOST_PTR`).
    ///
    /// ## Safety
    ///
    /// `ptr` must point to at least `size` writable bytes and stay valid
    /// for the lifetime of the buffer and of every command referencing it.
    pub unsafe fn use_host_ptr(mut self, ptr: *mut u8) -> BufferBuilder<'a> {
        if ptr.is_null() {
            self.fail(Status::InvalidHostPtr, "missing host storage pointer");
            return self;
        }
        if self.check_storage_unset() {
            self.storage = Storage::UseHost(ptr);
        }
        self
    }

    pub fn build(self) -> Result<Buffer> {
        if let Some(e) = self.err {
            return Err(e);
        }

        let inner = BufferInner {
            id: NEXT_MEM_ID.fetch_add(1, Ordering::Relaxed),
            kind: match self.storage {
                Storage::UseHost(_) => MemKind::Host,
                Storage::AllocHost => MemKind::HostAccessible,
                Storage::Unset | Storage::CopyHost(_) => MemKind::Device,
            },
            size: self.size,
            access: self.access.unwrap_or(Access::ReadWrite),
            ctx: self.ctx.clone(),
        };

        let init = match self.storage {
            Storage::CopyHost(src) => Some(&src[..self.size]),
            _ => None,
        };

        // Materialize on every device; roll back on the first failure.
        let devices = self.ctx.devices().to_vec();
        for (at, dev) in devices.iter().enumerate() {
            let created = match self.storage {
                Storage::UseHost(ptr) => {
                    dev.cpu().register_host_buffer(inner.id, ptr);
                    Ok(())
                }
                _ => dev.cpu().create_arena_buffer(inner.id, self.size, init),
            };

            if let Err(e) = created {
                for dev in &devices[..at] {
                    dev.cpu().free_buffer(inner.id);
                }
                self.ctx
                    .report_diagnostic("failed allocating resources for device buffer");
                return Err(e);
            }
        }

        Ok(Buffer(Arc::new(inner)))
    }
}
