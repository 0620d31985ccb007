//! Device session abstraction
//!
//! The render frontend records commands against these traits; a backend turns
//! them into real GPU work. Two backends exist:
//! - [`software::SoftwareDevice`]: a CPU executor thread standing in for the
//!   hardware queue (tests, headless runs)
//! - [`gpu::GpuDevice`]: wgpu-backed submission to real hardware

pub mod gpu;
pub mod software;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::types::{Extent, Result};
use crate::render::command::Command;
use crate::render::settings::PresentMode;
use crate::render::shader::{BindLayout, InputLayout};

/// Opaque handle to a device-resident resource (buffer or back-buffer image).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque handle to a compiled pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(u64);

impl PipelineId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Device-visible address of one element inside an upload buffer.
///
/// Valid for binding only while the frame slot that produced it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuAddress {
    pub buffer: ResourceId,
    pub offset: u64,
}

/// Health of a device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Healthy,
    /// Device reset or removal was detected; the context must be rebuilt.
    Lost(String),
}

/// What an upload-heap buffer will be bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Constant,
    Vertex,
    Index,
}

/// Upload-heap buffer creation parameters.
#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Pipeline creation parameters. Bytecode is an externally produced blob;
/// this layer never inspects it beyond what the backend requires.
pub struct PipelineDesc<'a> {
    pub label: &'a str,
    pub bytecode: &'a [u8],
    pub input_layout: &'a InputLayout,
    pub bind_layout: &'a BindLayout,
}

/// Swap chain creation parameters.
#[derive(Debug, Clone)]
pub struct SwapChainDesc {
    pub extent: Extent,
    pub buffer_count: u32,
    pub present_mode: PresentMode,
}

/// Upload-heap contents written this frame, made visible to the GPU before
/// the frame's commands execute.
pub struct UploadFlush<'a> {
    pub buffer: ResourceId,
    pub bytes: &'a [u8],
}

/// One frame's worth of recorded work handed to the executor.
pub struct Submission<'a> {
    /// Fence value the device signals once this frame's work completes.
    pub signal_fence: u64,
    /// Back-buffer the frame renders into.
    pub target: ResourceId,
    pub clear_color: [f64; 4],
    pub commands: &'a [Command],
    pub uploads: &'a [UploadFlush<'a>],
}

/// Native window surface as supplied by the platform layer.
pub trait NativeSurface: Send + Sync {
    /// Current pixel dimensions, or `None` once the surface is destroyed.
    fn extent(&self) -> Option<Extent>;
}

/// A GPU device session: resource creation, command submission, and the fence
/// watermark separating CPU-recorded frames from GPU-completed ones.
///
/// One session serves one window's queue and swap chain; concurrent
/// submission from multiple contexts is not supported.
pub trait DeviceSession: Send + Sync {
    /// Current device health. Checked at every frame start.
    fn status(&self) -> DeviceStatus;

    /// Create a CPU-writable, GPU-readable upload buffer.
    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<ResourceId>;

    /// Compile and create an immutable pipeline.
    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<PipelineId>;

    /// (Re)create the back-buffer chain for this session's surface.
    /// Returns one resource id per back-buffer.
    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<Vec<ResourceId>>;

    /// Release all back-buffers and recreate them at the new extent.
    fn resize_swap_chain(&self, extent: Extent) -> Result<Vec<ResourceId>>;

    /// Queue a frame for asynchronous execution. Fire-and-forget: completion
    /// is observed only through the fence watermark.
    fn submit(&self, submission: Submission<'_>) -> Result<()>;

    /// Submit the current back-buffer for display.
    fn present(&self, sync_interval: u32) -> Result<()>;

    /// Highest fence value the executor has signaled so far.
    fn completed_fence(&self) -> u64;

    /// Block until the fence watermark reaches `value`. A wait exceeding
    /// `timeout` is treated as a hung or removed device and fails with
    /// [`crate::core::Error::DeviceLost`].
    fn wait_fence(&self, value: u64, timeout: Duration) -> Result<()>;
}

/// Shared handle to a device session.
pub type SharedDevice = Arc<dyn DeviceSession>;
