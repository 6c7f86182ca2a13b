use std::fmt;

use tracing::{debug, error};

use super::backend::{BackendError, BufferAccess, ComputeBackend};
use super::config::ComputeConfig;
use super::status::StatusCode;
use crate::graph::{AttributeDirection, AttributeKey, GraphError, Node, NodeContext};
use crate::value::{Value, ELEMENT_BYTES};

/// Name of the function every kernel source must define.
pub const ENTRY_POINT: &str = "main_kernel";

/// Name of the string input holding the kernel source.
pub const KERNEL_SOURCE: &str = "kernel_source";

const BUILD_SUCCESS: &str = "Successfully built.";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KernelState {
    /// Device selection failed at construction; the node never executes.
    BackendUnavailable,
    /// A device is bound but no kernel is loaded.
    BackendReady,
    Ready,
    BuildFailed,
}

/// Smallest element count among the inputs, or 0 when there are none.
pub fn find_minor_input_size(
    attributes: impl IntoIterator<Item = (AttributeDirection, usize)>,
) -> usize {
    attributes
        .into_iter()
        .filter(|(direction, _)| direction.is_input())
        .map(|(_, size)| size)
        .min()
        .unwrap_or(0)
}

struct Binding {
    attribute: AttributeKey,
    direction: AttributeDirection,
    value: Value,
}

/// Node whose outputs are computed by a device kernel.
///
/// Dynamic attributes become kernel arguments in the order they were added:
/// inputs are uploaded, outputs are read back after the dispatch. The dispatch
/// covers as many elements as the smallest input holds.
pub struct KernelNode<B: ComputeBackend> {
    backend: Option<B>,
    init_error: Option<BackendError>,
    kernel_source: AttributeKey,
    program: Option<B::Program>,
    kernel: Option<B::Kernel>,
    state: KernelState,
    build_message: String,
}

impl<B: ComputeBackend> KernelNode<B> {
    pub fn new(config: &ComputeConfig) -> Self {
        let (backend, init_error, state) = match B::initialize(config) {
            Ok(backend) => (Some(backend), None, KernelState::BackendReady),
            Err(err) => {
                error!(status = %err.status, "compute backend unavailable: {}", err.message);
                (None, Some(err), KernelState::BackendUnavailable)
            }
        };

        Self {
            backend,
            init_error,
            kernel_source: AttributeKey::default(),
            program: None,
            kernel: None,
            state,
            build_message: String::new(),
        }
    }

    /// Diagnostic from the most recent build or execution attempt.
    pub fn build_info(&self) -> &str {
        &self.build_message
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn program_ready(&self) -> bool {
        self.state == KernelState::Ready
    }

    /// The program behind the current kernel, if the last build succeeded.
    pub fn program(&self) -> Option<&B::Program> {
        self.program.as_ref()
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn device_name(&self) -> Option<String> {
        self.backend.as_ref().map(B::device_name)
    }

    pub fn kernel_source_attribute(&self) -> AttributeKey {
        self.kernel_source
    }

    fn build_kernel_source(&mut self, ctx: &mut NodeContext<'_>) {
        self.build_message.clear();
        self.kernel = None;
        self.program = None;

        let source = ctx
            .value(self.kernel_source)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let Some(backend) = self.backend.as_ref() else {
            if let Some(err) = self.init_error.as_ref().filter(|_| !source.is_empty()) {
                self.build_message = describe(err);
            }
            return;
        };

        self.state = KernelState::BackendReady;
        if source.is_empty() {
            return;
        }

        match compile(backend, &source) {
            Ok((program, kernel)) => {
                debug!(device = %backend.device_name(), "kernel built");
                self.program = Some(program);
                self.kernel = Some(kernel);
                self.state = KernelState::Ready;
                self.build_message = BUILD_SUCCESS.to_owned();
            }
            Err(err) => {
                self.build_message = describe(&err);
                error!(status = %err.status, "{}", self.build_message);
                self.state = KernelState::BuildFailed;
            }
        }
    }

    fn execute(&mut self, ctx: &mut NodeContext<'_>) {
        let (Some(backend), Some(kernel)) = (self.backend.as_ref(), self.kernel.as_mut()) else {
            return;
        };

        let mut bindings = Vec::new();
        for attribute in ctx.dynamic_attributes() {
            let Some(direction) = ctx.direction(attribute) else {
                continue;
            };
            let value = match direction {
                AttributeDirection::Input => ctx.value(attribute),
                AttributeDirection::Output => ctx.stored_value(attribute),
            };
            bindings.push(Binding {
                attribute,
                direction,
                value: value.cloned().unwrap_or_default(),
            });
        }

        let work_size = find_minor_input_size(
            bindings
                .iter()
                .map(|binding| (binding.direction, binding.value.size())),
        );
        if work_size == 0 {
            return;
        }

        let result = dispatch(backend, kernel, &bindings, work_size);
        backend.clear_kernel_args(kernel);

        match result {
            Ok(outputs) => {
                if self.build_message != BUILD_SUCCESS {
                    self.build_message = BUILD_SUCCESS.to_owned();
                }
                for (attribute, value) in outputs {
                    ctx.set_output_value(attribute, value);
                }
            }
            Err(err) => {
                self.build_message = describe(&err);
                error!(status = %err.status, "{}", self.build_message);
            }
        }
    }
}

impl<B: ComputeBackend> fmt::Debug for KernelNode<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelNode")
            .field("state", &self.state)
            .field("build_message", &self.build_message)
            .finish()
    }
}

impl<B: ComputeBackend> Node for KernelNode<B> {
    fn type_name(&self) -> &'static str {
        "KernelNode"
    }

    fn init(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), GraphError> {
        self.kernel_source = ctx.add_input_attribute(KERNEL_SOURCE, Value::string(""))?;
        ctx.catch_attribute_dirtied(self.kernel_source);
        Ok(())
    }

    fn update(&mut self, ctx: &mut NodeContext<'_>, _attribute: AttributeKey) {
        if self.state == KernelState::Ready {
            self.execute(ctx);
        }
    }

    fn attribute_dirtied(&mut self, ctx: &mut NodeContext<'_>, attribute: AttributeKey) {
        if attribute == self.kernel_source {
            self.build_kernel_source(ctx);
        }
    }

    fn allows_dynamic_attributes(&self) -> bool {
        true
    }
}

fn compile<B: ComputeBackend>(
    backend: &B,
    source: &str,
) -> Result<(B::Program, B::Kernel), BackendError> {
    let mut program = backend.create_program(source)?;
    backend.build_program(&mut program)?;
    let kernel = backend.create_kernel(&program, ENTRY_POINT)?;
    Ok((program, kernel))
}

/// Binds one buffer per attribute, runs the kernel, and reads every output
/// back from the buffer bound to that same attribute.
fn dispatch<B: ComputeBackend>(
    backend: &B,
    kernel: &mut B::Kernel,
    bindings: &[Binding],
    work_size: usize,
) -> Result<Vec<(AttributeKey, Value)>, BackendError> {
    let byte_size = work_size * ELEMENT_BYTES;

    let mut buffers = Vec::with_capacity(bindings.len());
    for (index, binding) in bindings.iter().enumerate() {
        let access = match binding.direction {
            AttributeDirection::Input => BufferAccess::ReadOnly,
            AttributeDirection::Output => BufferAccess::WriteOnly,
        };
        let buffer = backend.create_buffer(access, byte_size)?;
        if binding.direction.is_input() {
            if let Some(bytes) = binding.value.array_bytes(work_size) {
                backend.write_buffer(&buffer, bytes)?;
            }
        }
        backend.set_kernel_arg(kernel, index as u32, &buffer)?;
        buffers.push(buffer);
    }

    backend.enqueue_kernel(kernel, work_size)?;
    backend.finish()?;

    let mut outputs = Vec::new();
    let mut bytes = vec![0u8; byte_size];
    for (binding, buffer) in bindings.iter().zip(&buffers) {
        if !binding.direction.is_output() {
            continue;
        }
        backend.read_buffer(buffer, &mut bytes)?;
        if let Some(value) = binding.value.array_from_bytes(&bytes) {
            outputs.push((binding.attribute, value));
        }
    }

    Ok(outputs)
}

fn describe(err: &BackendError) -> String {
    let mut message = match &err.build_log {
        Some(log) => format!("Compute error: {}\n{}", err.status.name(), log),
        None => format!("Compute error: {} {}", err.message, err.status.name()),
    };
    if err.status == StatusCode::INVALID_KERNEL_NAME {
        message.push_str(&format!("\n\nKernel name should be '{}'", ENTRY_POINT));
    }
    message
}
