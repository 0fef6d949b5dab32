//! Status codes and the crate error type.

use std::borrow::Cow;
use std::fmt;

use num_traits::FromPrimitive;

pub type Result<T> = std::result::Result<T, Error>;

/// An OpenCL-shaped status code.
///
/// `Success` is zero; every error is a distinct negative value matching the
/// numbering of the standard headers so that bindings can pass values
/// through unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    BuildProgramFailure = -11,
    MemObjectAllocationFailure = -4,
    OutOfResources = -5,
    ExecStatusErrorForEventsInWaitList = -14,
    InvalidValue = -30,
    InvalidDevice = -33,
    InvalidContext = -34,
    InvalidQueueProperties = -35,
    InvalidCommandQueue = -36,
    InvalidHostPtr = -37,
    InvalidMemObject = -38,
    InvalidBinary = -42,
    InvalidBuildOptions = -43,
    InvalidProgram = -44,
    InvalidProgramExecutable = -45,
    InvalidKernelName = -46,
    InvalidKernelDefinition = -47,
    InvalidKernel = -48,
    InvalidArgIndex = -49,
    InvalidArgValue = -50,
    InvalidArgSize = -51,
    InvalidKernelArgs = -52,
    InvalidWorkDimension = -53,
    InvalidWorkGroupSize = -54,
    InvalidWorkItemSize = -55,
    InvalidGlobalOffset = -56,
    InvalidEventWaitList = -57,
    InvalidEvent = -58,
    InvalidOperation = -59,
    InvalidBufferSize = -61,
    InvalidGlobalWorkSize = -63,
}

impl Status {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl FromPrimitive for Status {
    fn from_i64(n: i64) -> Option<Status> {
        let status = match n {
            0 => Status::Success,
            -4 => Status::MemObjectAllocationFailure,
            -5 => Status::OutOfResources,
            -11 => Status::BuildProgramFailure,
            -14 => Status::ExecStatusErrorForEventsInWaitList,
            -30 => Status::InvalidValue,
            -33 => Status::InvalidDevice,
            -34 => Status::InvalidContext,
            -35 => Status::InvalidQueueProperties,
            -36 => Status::InvalidCommandQueue,
            -37 => Status::InvalidHostPtr,
            -38 => Status::InvalidMemObject,
            -42 => Status::InvalidBinary,
            -43 => Status::InvalidBuildOptions,
            -44 => Status::InvalidProgram,
            -45 => Status::InvalidProgramExecutable,
            -46 => Status::InvalidKernelName,
            -47 => Status::InvalidKernelDefinition,
            -48 => Status::InvalidKernel,
            -49 => Status::InvalidArgIndex,
            -50 => Status::InvalidArgValue,
            -51 => Status::InvalidArgSize,
            -52 => Status::InvalidKernelArgs,
            -53 => Status::InvalidWorkDimension,
            -54 => Status::InvalidWorkGroupSize,
            -55 => Status::InvalidWorkItemSize,
            -56 => Status::InvalidGlobalOffset,
            -57 => Status::InvalidEventWaitList,
            -58 => Status::InvalidEvent,
            -59 => Status::InvalidOperation,
            -61 => Status::InvalidBufferSize,
            -63 => Status::InvalidGlobalWorkSize,
            _ => return None,
        };
        Some(status)
    }

    fn from_u64(n: u64) -> Option<Status> {
        if n == 0 {
            Some(Status::Success)
        } else {
            None
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as i32)
    }
}

/// The crate error: a status code plus a diagnostic message.
///
/// Mirrors how the runtime reports problems to the context diagnostic
/// stream: every failure path maps onto exactly one status code, with the
/// human-readable reason alongside.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{status}: {msg}")]
pub struct Error {
    status: Status,
    msg: Cow<'static, str>,
}

impl Error {
    pub fn new<M: Into<Cow<'static, str>>>(status: Status, msg: M) -> Error {
        Error {
            status,
            msg: msg.into(),
        }
    }

    /// The status code for this error, for callers that speak raw OpenCL
    /// status values.
    pub fn api_status(&self) -> Status {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Error {
        Error::new(status, "")
    }
}

#[inline]
pub(crate) fn err<T, M: Into<Cow<'static, str>>>(status: Status, msg: M) -> Result<T> {
    Err(Error::new(status, msg))
}
