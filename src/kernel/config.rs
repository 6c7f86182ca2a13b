use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid compute config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Class of device a compute node binds to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Software or CPU-backed devices.
    #[default]
    Cpu,
    Gpu,
    Any,
}

/// Native API a backend may run on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendApi {
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

/// Device selection for a compute node.
///
/// ```toml
/// device_class = "gpu"
/// backends = ["vulkan", "metal"]
/// label = "blur"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub device_class: DeviceClass,
    /// Empty means every API the platform offers.
    pub backends: Vec<BackendApi>,
    pub label: Option<String>,
}

impl ComputeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn with_device_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = device_class;
        self
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn wgpu_backends(&self) -> wgpu::Backends {
        if self.backends.is_empty() {
            return wgpu::Backends::all();
        }
        self.backends
            .iter()
            .fold(wgpu::Backends::empty(), |acc, api| {
                acc | match api {
                    BackendApi::Vulkan => wgpu::Backends::VULKAN,
                    BackendApi::Metal => wgpu::Backends::METAL,
                    BackendApi::Dx12 => wgpu::Backends::DX12,
                    BackendApi::Gl => wgpu::Backends::GL,
                }
            })
    }
}
