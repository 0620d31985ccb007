//! Error types for the render layer

use thiserror::Error;

use crate::core::types::Extent;
use crate::render::command::UploadKind;
use crate::render::device::ResourceId;
use crate::render::state::ResourceState;

/// Main error type for the render layer.
///
/// Variants fall into three groups:
/// - fatal: [`Error::DeviceLost`] — tear down and rebuild the whole context
/// - recoverable: [`Error::SurfaceLost`], [`Error::StaleSwapChain`] — recreate
///   only the swap chain against the new surface
/// - contract violations: everything else — caller misuse that fails loudly
///   instead of corrupting GPU memory
#[derive(Debug, Error)]
pub enum Error {
    /// The device session was reset or removed (driver crash, TDR).
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// The native surface behind the swap chain was destroyed.
    #[error("surface lost: {0}")]
    SurfaceLost(String),

    /// The surface was resized underneath the swap chain; the host must
    /// resize the chain before presenting again.
    #[error("stale swap chain: chain is {chain}, surface is {surface}")]
    StaleSwapChain { chain: Extent, surface: Extent },

    /// Per-frame data exceeded an upload buffer's preallocated capacity.
    /// Capacity is fixed at context construction; this is a sizing error.
    #[error("{kind} upload of {requested} elements exceeds capacity {capacity}")]
    CapacityExceeded {
        kind: UploadKind,
        requested: u32,
        capacity: u32,
    },

    /// Write past the end of an upload buffer.
    #[error("upload index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: u32, capacity: u32 },

    /// A resource was accessed in the wrong usage state, or a transition
    /// skipped an intermediate state.
    #[error("resource {resource} is in state {actual}, expected {expected}")]
    InvalidResourceState {
        resource: ResourceId,
        expected: ResourceState,
        actual: ResourceState,
    },

    /// Shader layout mismatch or device-level pipeline rejection.
    #[error("pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Frame lifecycle misuse (recording outside begin/end, double begin, ...).
    #[error("frame lifecycle violation: {0}")]
    FrameLifecycle(&'static str),

    /// Invalid render settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error requires tearing down the whole rendering context.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DeviceLost(_))
    }

    /// Whether the error is recoverable by recreating only the swap chain.
    pub fn is_swap_chain_recoverable(&self) -> bool {
        matches!(self, Error::SurfaceLost(_) | Error::StaleSwapChain { .. })
    }
}
