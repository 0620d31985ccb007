//! wgpu device session
//!
//! Maps the recorded command stream onto a wgpu queue. Frame-slot fences are
//! expressed through `on_submitted_work_done` callbacks driving the same
//! watermark the software backend maintains, so the frontend is oblivious to
//! which backend it runs on.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use winit::window::Window;

use crate::core::error::Error;
use crate::core::types::{Extent, Result};
use crate::render::command::{Command, IndexFormat};
use crate::render::device::{
    BufferDesc, BufferUsage, DeviceSession, DeviceStatus, PipelineDesc, PipelineId, ResourceId,
    Submission, SwapChainDesc,
};
use crate::render::settings::PresentMode;
use crate::render::shader::{BindingKind, VertexFormat};

struct FenceState {
    completed: Mutex<u64>,
    cvar: Condvar,
}

struct PipelineEntry {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    buffers: HashMap<ResourceId, wgpu::Buffer>,
    pipelines: HashMap<PipelineId, PipelineEntry>,
    pipeline_count: u64,
}

impl Registry {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    back_buffer_count: u32,
    /// Texture acquired for the frame being built, presented on `present`.
    acquired: Option<wgpu::SurfaceTexture>,
}

/// Hardware device session over a winit window.
pub struct GpuDevice {
    _instance: wgpu::Instance,
    _adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Mutex<Option<SurfaceState>>,
    surface_format: wgpu::TextureFormat,
    registry: Mutex<Registry>,
    fence: Arc<FenceState>,
    lost: Mutex<Option<String>>,
}

impl GpuDevice {
    /// Create the instance/adapter/device chain for `window`.
    ///
    /// The swap chain itself is configured later through
    /// [`DeviceSession::create_swap_chain`].
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| Error::SurfaceLost(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::DeviceLost(format!("no suitable adapter: {e:?}")))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("sable_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                experimental_features: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| Error::DeviceLost(e.to_string()))?;

        let capabilities = surface.get_capabilities(&adapter);
        let surface_format = capabilities.formats[0];
        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: capabilities.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        log::info!(
            "gpu device ready: {} ({:?})",
            adapter.get_info().name,
            surface_format
        );

        Ok(Self {
            _instance: instance,
            _adapter: adapter,
            device,
            queue,
            surface: Mutex::new(Some(SurfaceState {
                surface,
                config,
                back_buffer_count: 0,
                acquired: None,
            })),
            surface_format,
            registry: Mutex::new(Registry::default()),
            fence: Arc::new(FenceState {
                completed: Mutex::new(0),
                cvar: Condvar::new(),
            }),
            lost: Mutex::new(None),
        })
    }

    fn mark_lost(&self, reason: String) -> Error {
        let mut lost = self.lost.lock().unwrap();
        if lost.is_none() {
            log::error!("device lost: {reason}");
            *lost = Some(reason.clone());
        }
        Error::DeviceLost(reason)
    }

    fn ensure_healthy(&self) -> Result<()> {
        match self.lost.lock().unwrap().as_ref() {
            Some(reason) => Err(Error::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }

    fn map_surface_error(&self, err: wgpu::SurfaceError, extent: Extent) -> Error {
        match err {
            // Recoverable by reconfiguring at the current window size.
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => Error::StaleSwapChain {
                chain: extent,
                surface: extent,
            },
            wgpu::SurfaceError::Timeout => {
                Error::SurfaceLost("surface acquire timed out".into())
            }
            wgpu::SurfaceError::OutOfMemory => {
                self.mark_lost("surface out of memory".into())
            }
            other => Error::SurfaceLost(other.to_string()),
        }
    }
}

fn wgpu_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
    }
}

fn wgpu_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let bind = match usage {
        BufferUsage::Constant => wgpu::BufferUsages::UNIFORM,
        BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
        BufferUsage::Index => wgpu::BufferUsages::INDEX,
    };
    bind | wgpu::BufferUsages::COPY_DST
}

fn wgpu_present_mode(mode: PresentMode) -> wgpu::PresentMode {
    match mode {
        PresentMode::Fifo => wgpu::PresentMode::Fifo,
        PresentMode::Immediate => wgpu::PresentMode::Immediate,
    }
}

impl DeviceSession for GpuDevice {
    fn status(&self) -> DeviceStatus {
        match self.lost.lock().unwrap().as_ref() {
            Some(reason) => DeviceStatus::Lost(reason.clone()),
            None => DeviceStatus::Healthy,
        }
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<ResourceId> {
        self.ensure_healthy()?;
        if desc.size == 0 {
            return Err(Error::Config(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size,
            usage: wgpu_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        let mut registry = self.registry.lock().unwrap();
        let id = ResourceId::from_raw(registry.alloc_id());
        registry.buffers.insert(id, buffer);
        Ok(id)
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<PipelineId> {
        self.ensure_healthy()?;
        let source = std::str::from_utf8(desc.bytecode).map_err(|_| {
            Error::PipelineCreation(format!("shader '{}' is not valid wgsl text", desc.label))
        })?;

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let bind_group_layout = if desc.bind_layout.bindings.is_empty() {
            None
        } else {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
                .bind_layout
                .bindings
                .iter()
                .map(|binding| wgpu::BindGroupLayoutEntry {
                    binding: binding.slot,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: match binding.kind {
                            BindingKind::ConstantBuffer => wgpu::BufferBindingType::Uniform,
                            BindingKind::ShaderResource => {
                                wgpu::BufferBindingType::Storage { read_only: true }
                            }
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            Some(
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(desc.label),
                        entries: &entries,
                    }),
            )
        };

        let group_refs: Vec<&wgpu::BindGroupLayout> = bind_group_layout.iter().collect();
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &group_refs,
                immediate_size: 0,
            });

        let attributes: Vec<wgpu::VertexAttribute> = desc
            .input_layout
            .attributes
            .iter()
            .map(|attr| wgpu::VertexAttribute {
                format: wgpu_vertex_format(attr.format),
                offset: attr.offset as u64,
                shader_location: attr.location,
            })
            .collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: desc.input_layout.stride as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_buffers,
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.surface_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview_mask: None,
                cache: None,
            });

        let mut registry = self.registry.lock().unwrap();
        registry.pipeline_count += 1;
        let id = PipelineId::from_raw(registry.pipeline_count);
        registry.pipelines.insert(
            id,
            PipelineEntry {
                pipeline,
                bind_group_layout,
            },
        );
        Ok(id)
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<Vec<ResourceId>> {
        self.ensure_healthy()?;
        let mut guard = self.surface.lock().unwrap();
        let Some(state) = guard.as_mut() else {
            return Err(Error::SurfaceLost("window surface released".into()));
        };

        state.config.width = desc.extent.width.max(1);
        state.config.height = desc.extent.height.max(1);
        state.config.present_mode = wgpu_present_mode(desc.present_mode);
        state.config.desired_maximum_frame_latency = desc.buffer_count;
        state.surface.configure(&self.device, &state.config);
        state.back_buffer_count = desc.buffer_count;
        state.acquired = None;

        // wgpu does not expose individual chain images before acquire; the
        // ids exist for state tracking on the frontend side.
        let mut registry = self.registry.lock().unwrap();
        Ok((0..desc.buffer_count)
            .map(|_| ResourceId::from_raw(registry.alloc_id()))
            .collect())
    }

    fn resize_swap_chain(&self, extent: Extent) -> Result<Vec<ResourceId>> {
        self.ensure_healthy()?;
        let mut guard = self.surface.lock().unwrap();
        let Some(state) = guard.as_mut() else {
            return Err(Error::SurfaceLost("window surface released".into()));
        };

        state.config.width = extent.width.max(1);
        state.config.height = extent.height.max(1);
        state.surface.configure(&self.device, &state.config);
        state.acquired = None;

        let count = state.back_buffer_count;
        let mut registry = self.registry.lock().unwrap();
        Ok((0..count)
            .map(|_| ResourceId::from_raw(registry.alloc_id()))
            .collect())
    }

    fn submit(&self, submission: Submission<'_>) -> Result<()> {
        self.ensure_healthy()?;

        let mut surface_guard = self.surface.lock().unwrap();
        let Some(state) = surface_guard.as_mut() else {
            return Err(Error::SurfaceLost("window surface released".into()));
        };
        if state.acquired.is_none() {
            let extent = Extent::new(state.config.width, state.config.height);
            let texture = state
                .surface
                .get_current_texture()
                .map_err(|e| self.map_surface_error(e, extent))?;
            state.acquired = Some(texture);
        }
        let view = match state.acquired.as_ref() {
            Some(texture) => texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
            None => return Err(Error::SurfaceLost("no acquired back-buffer".into())),
        };

        let registry = self.registry.lock().unwrap();
        for flush in submission.uploads {
            let Some(buffer) = registry.buffers.get(&flush.buffer) else {
                return Err(Error::Config(format!(
                    "upload references unknown buffer {}",
                    flush.buffer
                )));
            };
            self.queue.write_buffer(buffer, 0, flush.bytes);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sable_frame"),
            });
        {
            let [r, g, b, a] = submission.clear_color;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("sable_frame_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            let mut bound_layout: Option<&wgpu::BindGroupLayout> = None;
            for command in submission.commands {
                match *command {
                    // Barriers are resolved by wgpu's internal tracking.
                    Command::Transition { .. } => {}
                    Command::SetPipeline(id) => {
                        let Some(entry) = registry.pipelines.get(&id) else {
                            return Err(Error::Config("unknown pipeline bound".into()));
                        };
                        pass.set_pipeline(&entry.pipeline);
                        bound_layout = entry.bind_group_layout.as_ref();
                    }
                    Command::SetVertexBuffer { binding, .. } => {
                        let Some(buffer) = registry.buffers.get(&binding.buffer) else {
                            return Err(Error::Config("unknown vertex buffer bound".into()));
                        };
                        pass.set_vertex_buffer(0, buffer.slice(binding.offset..));
                    }
                    Command::SetIndexBuffer { binding, format } => {
                        let Some(buffer) = registry.buffers.get(&binding.buffer) else {
                            return Err(Error::Config("unknown index buffer bound".into()));
                        };
                        let format = match format {
                            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                        };
                        pass.set_index_buffer(buffer.slice(binding.offset..), format);
                    }
                    Command::SetConstants { slot, binding } => {
                        let Some(layout) = bound_layout else {
                            return Err(Error::Config(
                                "constants bound without a pipeline bind layout".into(),
                            ));
                        };
                        let Some(buffer) = registry.buffers.get(&binding.buffer) else {
                            return Err(Error::Config("unknown constant buffer bound".into()));
                        };
                        let bind_group =
                            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                                label: Some("sable_constants"),
                                layout,
                                entries: &[wgpu::BindGroupEntry {
                                    binding: slot,
                                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                        buffer,
                                        offset: binding.offset,
                                        size: None,
                                    }),
                                }],
                            });
                        pass.set_bind_group(0, &bind_group, &[]);
                    }
                    Command::Draw {
                        vertex_count,
                        instance_count,
                        first_vertex,
                    } => {
                        pass.draw(
                            first_vertex..first_vertex + vertex_count,
                            0..instance_count,
                        );
                    }
                    Command::DrawIndexed {
                        index_count,
                        instance_count,
                        first_index,
                        base_vertex,
                    } => {
                        pass.draw_indexed(
                            first_index..first_index + index_count,
                            base_vertex,
                            0..instance_count,
                        );
                    }
                }
            }
        }
        drop(registry);

        self.queue.submit(std::iter::once(encoder.finish()));

        let fence = self.fence.clone();
        let signal = submission.signal_fence;
        self.queue.on_submitted_work_done(move || {
            let mut completed = fence.completed.lock().unwrap();
            *completed = completed.max(signal);
            fence.cvar.notify_all();
        });
        Ok(())
    }

    fn present(&self, _sync_interval: u32) -> Result<()> {
        self.ensure_healthy()?;
        let mut guard = self.surface.lock().unwrap();
        let Some(state) = guard.as_mut() else {
            return Err(Error::SurfaceLost("window surface released".into()));
        };
        match state.acquired.take() {
            Some(texture) => {
                texture.present();
                Ok(())
            }
            None => Err(Error::SurfaceLost("present with no acquired frame".into())),
        }
    }

    fn completed_fence(&self) -> u64 {
        let _ = self.device.poll(wgpu::PollType::Poll);
        *self.fence.completed.lock().unwrap()
    }

    fn wait_fence(&self, value: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_healthy()?;
            if *self.fence.completed.lock().unwrap() >= value {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(self.mark_lost(format!(
                    "fence wait for value {value} timed out after {timeout:?}"
                )));
            }
            // Drives callback delivery; the watermark advances inside it.
            let _ = self
                .device
                .poll(wgpu::PollType::Wait {
                    submission_index: None,
                    timeout: Some(deadline - Instant::now()),
                });
        }
    }
}
