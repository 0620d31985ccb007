//! CPU-side draw payload types
//!
//! Value data handed in from the scene layer; no behavior beyond layout.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// One vertex as the basic pipeline consumes it (must match shader input)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position (12 bytes, offset 0)
    pub position: [f32; 3],
    /// Linear RGBA color (16 bytes, offset 12)
    pub color: [f32; 4],
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 4]) -> Self {
        Self { position, color }
    }
}

/// Per-object shader constants (must match shader struct exactly)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectConstants {
    /// Combined world-view-projection matrix (64 bytes, offset 0)
    pub world_view_proj: [[f32; 4]; 4],
}

impl ObjectConstants {
    pub fn from_matrix(world_view_proj: Mat4) -> Self {
        Self {
            world_view_proj: world_view_proj.to_cols_array_2d(),
        }
    }
}

impl Default for ObjectConstants {
    fn default() -> Self {
        Self::from_matrix(Mat4::IDENTITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        // Must be exactly 28 bytes to match the declared input layout
        assert_eq!(std::mem::size_of::<Vertex>(), 28);
    }

    #[test]
    fn test_object_constants_size() {
        // One column-major mat4x4<f32>
        assert_eq!(std::mem::size_of::<ObjectConstants>(), 64);
    }

    #[test]
    fn test_constants_from_matrix() {
        let constants = ObjectConstants::from_matrix(Mat4::IDENTITY);
        assert_eq!(constants.world_view_proj[0][0], 1.0);
        assert_eq!(constants.world_view_proj[3][3], 1.0);
        assert_eq!(constants.world_view_proj[0][1], 0.0);
    }
}
