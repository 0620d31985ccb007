//! Deferred command recording types
//!
//! Nothing here executes synchronously: commands are appended to the current
//! frame slot and handed to the device executor at `end_frame`.

use std::fmt;

use crate::render::device::{GpuAddress, PipelineId, ResourceId};
use crate::render::mesh::{ObjectConstants, Vertex};
use crate::render::state::ResourceState;

/// Index element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Which per-frame upload arena a piece of data targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Constants,
    Vertices,
    Indices,
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadKind::Constants => "constant",
            UploadKind::Vertices => "vertex",
            UploadKind::Indices => "index",
        };
        f.write_str(name)
    }
}

/// Per-frame data to copy into the current slot's upload arena.
///
/// The tag selects the arena; element types are fixed per arena.
pub enum UploadData<'a> {
    Constants(&'a [ObjectConstants]),
    Vertices(&'a [Vertex]),
    Indices(&'a [u32]),
}

impl UploadData<'_> {
    pub fn kind(&self) -> UploadKind {
        match self {
            UploadData::Constants(_) => UploadKind::Constants,
            UploadData::Vertices(_) => UploadKind::Vertices,
            UploadData::Indices(_) => UploadKind::Indices,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            UploadData::Constants(data) => data.len(),
            UploadData::Vertices(data) => data.len(),
            UploadData::Indices(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Range of elements placed by an upload, usable for binding draws recorded
/// later in the same frame.
#[derive(Debug, Clone, Copy)]
pub struct UploadRange {
    /// Device-visible address of the first element.
    pub address: GpuAddress,
    /// First element index within the arena.
    pub first: u32,
    /// Number of elements.
    pub count: u32,
    /// Byte stride between consecutive elements.
    pub stride: u32,
}

/// One recorded draw: upload-buffer ranges plus the bound pipeline state.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub vertices: UploadRange,
    /// Indexed draw when present; vertex count otherwise comes from
    /// `vertices.count`.
    pub indices: Option<UploadRange>,
    /// Per-object constants bound at root slot 0.
    pub constants: Option<GpuAddress>,
    pub instance_count: u32,
}

impl DrawCall {
    pub fn new(vertices: UploadRange) -> Self {
        Self {
            vertices,
            indices: None,
            constants: None,
            instance_count: 1,
        }
    }

    pub fn with_indices(mut self, indices: UploadRange) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn with_constants(mut self, constants: GpuAddress) -> Self {
        self.constants = Some(constants);
        self
    }
}

/// Commands recorded into a frame slot.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    /// Resource usage-state barrier.
    Transition {
        resource: ResourceId,
        from: ResourceState,
        to: ResourceState,
    },
    SetPipeline(PipelineId),
    SetVertexBuffer {
        binding: GpuAddress,
        stride: u32,
    },
    SetIndexBuffer {
        binding: GpuAddress,
        format: IndexFormat,
    },
    /// Bind a constant-buffer element at a root slot.
    SetConstants {
        slot: u32,
        binding: GpuAddress,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    },
}
