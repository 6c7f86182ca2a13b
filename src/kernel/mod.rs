mod backend;
mod config;
mod node;
mod status;
#[cfg(feature = "gpu")]
mod wgpu_backend;


pub use backend::{BackendError, BufferAccess, ComputeBackend};
pub use config::{BackendApi, ComputeConfig, ConfigError, DeviceClass};
pub use node::{find_minor_input_size, KernelNode, KernelState, ENTRY_POINT, KERNEL_SOURCE};
pub use status::{status_name, StatusCode};
#[cfg(feature = "gpu")]
pub use wgpu_backend::{WgpuBackend, WgpuKernel, WgpuProgram};
