//! The user-facing runtime types.

pub(crate) mod buffer;
pub(crate) mod command;
pub(crate) mod context;
pub(crate) mod device;
pub(crate) mod event;
pub(crate) mod kernel;
pub(crate) mod platform;
pub(crate) mod program;
pub(crate) mod queue;
pub(crate) mod spatial_dims;

pub use self::buffer::{Access, Buffer, BufferBuilder, MemFlags};
pub use self::command::{KernelCmd, NativeKernelCmd, ReadBufferCmd, WriteBufferCmd};
pub use self::context::{Context, ErrorCallback};
pub use self::device::{Device, DeviceInfo, DeviceType};
pub use self::event::{
    status, wait_for_events, CommandType, Event, ExecutionStatus,
};
pub use self::kernel::Kernel;
pub use self::platform::{Platform, PlatformBuilder};
pub use self::program::{BuildCallback, BuildInformation, BuildStatus, Program};
pub use self::queue::{Queue, QueueProperties, QueueType};
pub use self::spatial_dims::SpatialDims;
