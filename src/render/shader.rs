//! Immutable shader pipeline objects

use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::device::{DeviceSession, PipelineDesc, PipelineId};

/// Format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
}

impl VertexFormat {
    pub const fn size_bytes(&self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
            VertexFormat::Uint32 => 4,
        }
    }
}

/// One attribute within the vertex input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    pub format: VertexFormat,
    /// Byte offset from the start of the vertex.
    pub offset: u32,
}

/// Vertex input layout: declared stride plus the attributes inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl InputLayout {
    pub fn new(stride: u32, attributes: Vec<VertexAttribute>) -> Self {
        Self { stride, attributes }
    }

    /// Check internal consistency: every attribute fits inside the declared
    /// stride, locations are unique, and attributes do not overlap.
    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 && !self.attributes.is_empty() {
            return Err(Error::PipelineCreation(
                "input layout declares attributes but zero stride".into(),
            ));
        }
        for attr in &self.attributes {
            let end = attr.offset + attr.format.size_bytes();
            if end > self.stride {
                return Err(Error::PipelineCreation(format!(
                    "attribute at location {} ends at byte {} but stride is {}",
                    attr.location, end, self.stride
                )));
            }
        }
        for (i, a) in self.attributes.iter().enumerate() {
            for b in &self.attributes[i + 1..] {
                if a.location == b.location {
                    return Err(Error::PipelineCreation(format!(
                        "duplicate attribute location {}",
                        a.location
                    )));
                }
                let a_end = a.offset + a.format.size_bytes();
                let b_end = b.offset + b.format.size_bytes();
                if a.offset < b_end && b.offset < a_end {
                    return Err(Error::PipelineCreation(format!(
                        "attributes at locations {} and {} overlap",
                        a.location, b.location
                    )));
                }
            }
        }
        Ok(())
    }
}

/// What a bind point exposes to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    ConstantBuffer,
    ShaderResource,
}

/// One root bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub slot: u32,
    pub kind: BindingKind,
}

/// Root bind layout: the resources a pipeline expects at draw time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindLayout {
    pub bindings: Vec<Binding>,
}

impl BindLayout {
    pub fn new(bindings: Vec<Binding>) -> Self {
        Self { bindings }
    }

    pub fn validate(&self) -> Result<()> {
        for (i, a) in self.bindings.iter().enumerate() {
            for b in &self.bindings[i + 1..] {
                if a.slot == b.slot {
                    return Err(Error::PipelineCreation(format!(
                        "duplicate bind slot {}",
                        a.slot
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One immutable compiled pipeline configuration.
///
/// Never mutated after [`Shader::load`]; share it as `Arc<Shader>` across any
/// number of concurrent draw submissions.
#[derive(Debug)]
pub struct Shader {
    label: String,
    pipeline: PipelineId,
    input_layout: InputLayout,
    bind_layout: BindLayout,
}

impl Shader {
    /// Validate the layouts and create the device pipeline.
    ///
    /// Synchronous and potentially slow (driver compilation): call at
    /// startup or load time, never per-frame. Fails with
    /// [`Error::PipelineCreation`] on layout mismatch or device rejection.
    pub fn load(
        device: &dyn DeviceSession,
        label: &str,
        bytecode: &[u8],
        input_layout: InputLayout,
        bind_layout: BindLayout,
    ) -> Result<Arc<Shader>> {
        if bytecode.is_empty() {
            return Err(Error::PipelineCreation("empty shader bytecode".into()));
        }
        input_layout.validate()?;
        bind_layout.validate()?;

        let pipeline = device.create_pipeline(&PipelineDesc {
            label,
            bytecode,
            input_layout: &input_layout,
            bind_layout: &bind_layout,
        })?;
        log::debug!("loaded shader '{label}' ({} bytes)", bytecode.len());

        Ok(Arc::new(Shader {
            label: label.to_string(),
            pipeline,
            input_layout,
            bind_layout,
        }))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    pub fn input_layout(&self) -> &InputLayout {
        &self.input_layout
    }

    pub fn bind_layout(&self) -> &BindLayout {
        &self.bind_layout
    }

    /// Declared byte stride of one vertex.
    pub fn vertex_stride(&self) -> u32 {
        self.input_layout.stride
    }
}

/// Input layout matching [`crate::render::mesh::Vertex`].
pub fn vertex_color_layout() -> InputLayout {
    InputLayout::new(
        28,
        vec![
            VertexAttribute {
                location: 0,
                format: VertexFormat::Float32x3,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                format: VertexFormat::Float32x4,
                offset: 12,
            },
        ],
    )
}

/// Bind layout with a single constant buffer at slot 0.
pub fn object_constants_layout() -> BindLayout {
    BindLayout::new(vec![Binding {
        slot: 0,
        kind: BindingKind::ConstantBuffer,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::software::SoftwareDevice;

    #[test]
    fn test_load_valid_shader() {
        let device = SoftwareDevice::new();
        let shader = Shader::load(
            &device,
            "basic",
            b"shader blob",
            vertex_color_layout(),
            object_constants_layout(),
        )
        .unwrap();

        assert_eq!(shader.vertex_stride(), 28);
        assert_eq!(shader.bind_layout().bindings.len(), 1);
    }

    #[test]
    fn test_empty_bytecode_rejected() {
        let device = SoftwareDevice::new();
        let err = Shader::load(
            &device,
            "basic",
            b"",
            vertex_color_layout(),
            object_constants_layout(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PipelineCreation(_)));
    }

    #[test]
    fn test_attribute_past_stride_rejected() {
        let layout = InputLayout::new(
            16,
            vec![VertexAttribute {
                location: 0,
                format: VertexFormat::Float32x4,
                offset: 8,
            }],
        );
        assert!(matches!(
            layout.validate(),
            Err(Error::PipelineCreation(_))
        ));
    }

    #[test]
    fn test_overlapping_attributes_rejected() {
        let layout = InputLayout::new(
            32,
            vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x4,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x2,
                    offset: 12,
                },
            ],
        );
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_duplicate_bind_slot_rejected() {
        let layout = BindLayout::new(vec![
            Binding {
                slot: 0,
                kind: BindingKind::ConstantBuffer,
            },
            Binding {
                slot: 0,
                kind: BindingKind::ShaderResource,
            },
        ]);
        assert!(layout.validate().is_err());
    }
}
