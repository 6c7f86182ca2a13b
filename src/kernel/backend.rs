use thiserror::Error;

use super::config::ComputeConfig;
use super::status::StatusCode;

/// Failure reported by a compute backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({status})")]
pub struct BackendError {
    pub status: StatusCode,
    pub message: String,
    /// Compiler output, when the failure came from building a program.
    pub build_log: Option<String>,
}

impl BackendError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            build_log: None,
        }
    }

    pub fn with_build_log(mut self, log: impl Into<String>) -> Self {
        self.build_log = Some(log.into());
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    WriteOnly,
}

/// Device-side operations a [`KernelNode`](super::KernelNode) needs.
///
/// A backend is bound to one device for its whole lifetime. All transfers and
/// dispatches are blocking from the caller's point of view once
/// [`finish`](ComputeBackend::finish) returns.
pub trait ComputeBackend: Sized + 'static {
    type Program: 'static;
    type Kernel: 'static;
    type Buffer;

    /// Selects a device according to `config`. Any failure is final for the
    /// instance.
    fn initialize(config: &ComputeConfig) -> Result<Self, BackendError>;

    fn device_name(&self) -> String;

    /// Wraps kernel source without compiling it.
    fn create_program(&self, source: &str) -> Result<Self::Program, BackendError>;

    /// Compiles a program. Errors carry the compiler log.
    fn build_program(&self, program: &mut Self::Program) -> Result<(), BackendError>;

    /// Looks up `entry_point` in a built program. A missing symbol is reported
    /// as [`StatusCode::INVALID_KERNEL_NAME`].
    fn create_kernel(
        &self,
        program: &Self::Program,
        entry_point: &str,
    ) -> Result<Self::Kernel, BackendError>;

    fn create_buffer(
        &self,
        access: BufferAccess,
        byte_size: usize,
    ) -> Result<Self::Buffer, BackendError>;

    /// Blocking host to device copy starting at offset zero.
    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), BackendError>;

    fn set_kernel_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        buffer: &Self::Buffer,
    ) -> Result<(), BackendError>;

    /// Drops every buffer bound to `kernel`.
    fn clear_kernel_args(&self, kernel: &mut Self::Kernel);

    /// Launches `kernel` over a one dimensional range of `global_size` items.
    fn enqueue_kernel(&self, kernel: &Self::Kernel, global_size: usize)
        -> Result<(), BackendError>;

    /// Blocks until all queued work has completed.
    fn finish(&self) -> Result<(), BackendError>;

    /// Blocking device to host copy of `out.len()` bytes.
    fn read_buffer(&self, buffer: &Self::Buffer, out: &mut [u8]) -> Result<(), BackendError>;
}
