//! Render layer configuration

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Swap behavior at present time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    /// Vsync; broadly supported.
    Fifo,
    /// Present as fast as possible, tearing allowed.
    Immediate,
}

/// Fixed-at-construction parameters of a rendering context.
///
/// Upload capacities are worst-case per-frame element counts; they never grow
/// mid-frame, so undersizing surfaces as `CapacityExceeded` at upload time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Frame slots rotated round-robin (CPU may record this many frames
    /// ahead of the GPU). Typically 2-3.
    pub frames_in_flight: u32,
    /// Back-buffers in the swap chain.
    pub back_buffer_count: u32,
    /// Per-slot constant arena capacity (max objects per frame).
    pub max_objects: u32,
    /// Per-slot vertex arena capacity.
    pub max_vertices: u32,
    /// Per-slot index arena capacity.
    pub max_indices: u32,
    pub present_mode: PresentMode,
    /// Sync interval passed to present (0 = no vsync wait).
    pub sync_interval: u32,
    /// A fence wait longer than this is treated as a lost device.
    pub fence_timeout_ms: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            back_buffer_count: 2,
            max_objects: 256,
            max_vertices: 1 << 16,
            max_indices: 3 << 16,
            present_mode: PresentMode::Fifo,
            sync_interval: 1,
            fence_timeout_ms: 2000,
        }
    }
}

impl RenderSettings {
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.back_buffer_count < 2 {
            return Err(Error::Config("back_buffer_count must be at least 2".into()));
        }
        if self.max_objects == 0 || self.max_vertices == 0 || self.max_indices == 0 {
            return Err(Error::Config("upload capacities must be non-zero".into()));
        }
        if self.fence_timeout_ms == 0 {
            return Err(Error::Config("fence_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }
}
