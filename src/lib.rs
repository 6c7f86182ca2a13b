pub mod graph;
pub mod kernel;
pub mod value;

pub use graph::*;
#[cfg(feature = "gpu")]
pub use kernel::WgpuBackend;
pub use kernel::{
    find_minor_input_size, status_name, BackendApi, BackendError, BufferAccess, ComputeBackend,
    ComputeConfig, ConfigError, DeviceClass, KernelNode, KernelState, StatusCode, ENTRY_POINT,
    KERNEL_SOURCE,
};
pub use value::{NumericArray, Scalar, Value, ValueType};
