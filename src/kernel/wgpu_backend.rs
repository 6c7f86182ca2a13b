//! [`ComputeBackend`] on top of wgpu.
//!
//! Kernels are WGSL compute shaders. Each kernel argument `N` is a storage
//! buffer at `@group(0) @binding(N)`; inputs are declared `read`, outputs
//! `read_write`. The entry point must bounds-check against `arrayLength`, since
//! the dispatch is rounded up to whole workgroups.

use std::borrow::Cow;
use std::rc::Rc;
use std::sync::mpsc;

use tracing::{error, info};

use super::backend::{BackendError, BufferAccess, ComputeBackend};
use super::config::{ComputeConfig, DeviceClass};
use super::status::StatusCode;

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    label: String,
}

/// Parsed and validated WGSL.
pub struct WgpuProgram {
    source: String,
    module: Option<naga::Module>,
    shader: Option<wgpu::ShaderModule>,
}

pub struct WgpuKernel {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    workgroup_size: u32,
    args: Vec<Option<Rc<wgpu::Buffer>>>,
}

fn matches_class(device_type: wgpu::DeviceType, class: DeviceClass) -> bool {
    match class {
        DeviceClass::Any => true,
        DeviceClass::Cpu => device_type == wgpu::DeviceType::Cpu,
        DeviceClass::Gpu => matches!(
            device_type,
            wgpu::DeviceType::DiscreteGpu
                | wgpu::DeviceType::IntegratedGpu
                | wgpu::DeviceType::VirtualGpu
        ),
    }
}

impl WgpuBackend {
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn wait(&self) -> Result<(), BackendError> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| BackendError::new(StatusCode::OUT_OF_RESOURCES, e.to_string()))
    }

    fn scoped<T>(
        &self,
        status: StatusCode,
        f: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, BackendError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(BackendError::new(status, err.to_string())),
            None => Ok(value),
        }
    }
}

impl ComputeBackend for WgpuBackend {
    type Program = WgpuProgram;
    type Kernel = WgpuKernel;
    type Buffer = Rc<wgpu::Buffer>;

    fn initialize(config: &ComputeConfig) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.wgpu_backends(),
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(config.wgpu_backends());
        let platform = adapters
            .first()
            .map(|adapter| adapter.get_info().backend)
            .ok_or_else(|| {
                BackendError::new(StatusCode::PLATFORM_NOT_FOUND, "no platforms available.")
            })?;

        let adapter = adapters
            .into_iter()
            .find(|adapter| {
                let info = adapter.get_info();
                info.backend == platform && matches_class(info.device_type, config.device_class)
            })
            .ok_or_else(|| {
                BackendError::new(StatusCode::DEVICE_NOT_FOUND, "no devices available.")
            })?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "compute adapter selected"
        );

        let label = config
            .label
            .clone()
            .unwrap_or_else(|| "lazyflow compute".to_owned());

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some(label.as_str()),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            ..Default::default()
        }))
        .map_err(|e: wgpu::RequestDeviceError| {
            BackendError::new(
                StatusCode::INVALID_COMMAND_QUEUE,
                format!("error creating command queue: {}", e),
            )
        })?;

        Ok(Self {
            device,
            queue,
            adapter_info,
            label,
        })
    }

    fn device_name(&self) -> String {
        self.adapter_info.name.clone()
    }

    fn create_program(&self, source: &str) -> Result<Self::Program, BackendError> {
        Ok(WgpuProgram {
            source: source.to_owned(),
            module: None,
            shader: None,
        })
    }

    fn build_program(&self, program: &mut Self::Program) -> Result<(), BackendError> {
        let module = naga::front::wgsl::parse_str(&program.source).map_err(|e| {
            BackendError::new(StatusCode::BUILD_PROGRAM_FAILURE, e.message())
                .with_build_log(e.emit_to_string(&program.source))
        })?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).map_err(|e| {
            BackendError::new(StatusCode::BUILD_PROGRAM_FAILURE, e.to_string())
                .with_build_log(e.emit_to_string(&program.source))
        })?;

        let shader = self
            .scoped(StatusCode::BUILD_PROGRAM_FAILURE, |device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(self.label.as_str()),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&program.source)),
                })
            })
            .map_err(|e| {
                let log = e.message.clone();
                e.with_build_log(log)
            })?;

        program.module = Some(module);
        program.shader = Some(shader);
        Ok(())
    }

    fn create_kernel(
        &self,
        program: &Self::Program,
        entry_point: &str,
    ) -> Result<Self::Kernel, BackendError> {
        let (Some(module), Some(shader)) = (&program.module, &program.shader) else {
            return Err(BackendError::new(
                StatusCode::INVALID_PROGRAM_EXECUTABLE,
                "program has not been built",
            ));
        };

        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry_point && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| {
                BackendError::new(
                    StatusCode::INVALID_KERNEL_NAME,
                    format!("no compute entry point named '{}'", entry_point),
                )
            })?;

        let pipeline = self.scoped(StatusCode::INVALID_KERNEL_DEFINITION, |device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: None,
                module: shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        })?;
        let layout = pipeline.get_bind_group_layout(0);

        Ok(WgpuKernel {
            pipeline,
            layout,
            workgroup_size: entry.workgroup_size[0].max(1),
            args: Vec::new(),
        })
    }

    fn create_buffer(
        &self,
        access: BufferAccess,
        byte_size: usize,
    ) -> Result<Self::Buffer, BackendError> {
        let size = byte_size as u64;
        if size == 0 || size > u64::from(self.device.limits().max_storage_buffer_binding_size) {
            return Err(BackendError::new(
                StatusCode::INVALID_BUFFER_SIZE,
                format!("cannot allocate a {} byte storage buffer", size),
            ));
        }

        let usage = match access {
            BufferAccess::ReadOnly => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferAccess::WriteOnly => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        };

        // Zero-initialised by wgpu.
        Ok(Rc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel argument"),
            size,
            usage,
            mapped_at_creation: false,
        })))
    }

    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]) -> Result<(), BackendError> {
        self.queue.write_buffer(buffer, 0, data);
        self.queue.submit(None);
        self.wait()
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        buffer: &Self::Buffer,
    ) -> Result<(), BackendError> {
        let index = index as usize;
        if kernel.args.len() <= index {
            kernel.args.resize(index + 1, None);
        }
        kernel.args[index] = Some(Rc::clone(buffer));
        Ok(())
    }

    fn clear_kernel_args(&self, kernel: &mut Self::Kernel) {
        kernel.args.clear();
    }

    fn enqueue_kernel(&self, kernel: &Self::Kernel, global_size: usize) -> Result<(), BackendError> {
        let entries = kernel
            .args
            .iter()
            .enumerate()
            .map(|(binding, buffer)| {
                buffer
                    .as_ref()
                    .map(|buffer| wgpu::BindGroupEntry {
                        binding: binding as u32,
                        resource: buffer.as_entire_binding(),
                    })
                    .ok_or_else(|| {
                        BackendError::new(
                            StatusCode::INVALID_KERNEL_ARGS,
                            format!("argument {} is not set", binding),
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bind_group = self.scoped(StatusCode::INVALID_KERNEL_ARGS, |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("kernel arguments"),
                layout: &kernel.layout,
                entries: &entries,
            })
        })?;

        let workgroup_size = kernel.workgroup_size as usize;
        let workgroup_count = global_size.div_ceil(workgroup_size);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernel dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kernel pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroup_count as u32, 1, 1);
        }

        self.scoped(StatusCode::INVALID_GLOBAL_WORK_SIZE, |_| {
            self.queue.submit(Some(encoder.finish()));
        })
    }

    fn finish(&self) -> Result<(), BackendError> {
        self.wait()
    }

    fn read_buffer(&self, buffer: &Self::Buffer, out: &mut [u8]) -> Result<(), BackendError> {
        let size = out.len() as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernel readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..size);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait()?;

        let mapped = rx.recv().map_err(|e| e.to_string()).and_then(|result| {
            result.map_err(|e| e.to_string())
        });
        if let Err(message) = mapped {
            error!("buffer readback failed: {}", message);
            return Err(BackendError::new(StatusCode::MAP_FAILURE, message));
        }

        {
            let view = slice.get_mapped_range();
            out.copy_from_slice(&view);
        }
        staging.unmap();
        Ok(())
    }
}
