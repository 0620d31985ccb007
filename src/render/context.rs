//! Frame lifecycle orchestration
//!
//! `RenderingContext` sequences one frame from start to finish and guarantees
//! the CPU never overwrites memory the GPU may still be reading: frame slots
//! rotate round-robin, and a slot is only reused once its fence watermark has
//! been signaled by the executor.

use std::sync::Arc;
use std::time::Duration;

use bytemuck::Pod;

use crate::core::error::Error;
use crate::core::types::{Extent, Result};
use crate::render::buffer::{ConstantUploadBuffer, LinearUploadBuffer, UploadBuffer};
use crate::render::command::{Command, DrawCall, IndexFormat, UploadData, UploadKind, UploadRange};
use crate::render::device::{
    BufferUsage, DeviceStatus, GpuAddress, NativeSurface, PipelineId, ResourceId, SharedDevice,
    Submission, UploadFlush,
};
use crate::render::mesh::{ObjectConstants, Vertex};
use crate::render::settings::RenderSettings;
use crate::render::shader::Shader;
use crate::render::state::{ResourceState, StateTracker};
use crate::render::swapchain::SwapChainHandle;

/// One reusable set of per-frame recording resources.
///
/// Upload arenas are duplicated per slot so the CPU can fill frame K+1 while
/// the GPU still reads frame K.
struct FrameSlot {
    /// Fence value signaled at this slot's last submission; 0 = never used,
    /// so the first pass over the slots never blocks.
    fence_value: u64,
    constants: ConstantUploadBuffer<ObjectConstants>,
    vertices: LinearUploadBuffer<Vertex>,
    indices: LinearUploadBuffer<u32>,
    constants_cursor: u32,
    vertices_cursor: u32,
    indices_cursor: u32,
}

impl FrameSlot {
    fn reset_cursors(&mut self) {
        self.constants_cursor = 0;
        self.vertices_cursor = 0;
        self.indices_cursor = 0;
    }
}

/// Owns the device session, frame slots, and swap chain for one window.
///
/// Exactly one frame is open at a time; the host calls `begin_frame`, records
/// uploads and draws, and closes with `end_frame`. Only `begin_frame` may
/// block, and only when all frame slots are saturated.
pub struct RenderingContext {
    device: SharedDevice,
    swap_chain: SwapChainHandle,
    settings: RenderSettings,
    slots: Vec<FrameSlot>,
    slot_index: usize,
    /// Next fence value to signal; monotonic, starts at 1.
    next_fence: u64,
    frame_count: u64,
    recording: bool,
    bound_pipeline: Option<PipelineId>,
    tracker: StateTracker,
    commands: Vec<Command>,
    clear_color: [f64; 4],
}

impl RenderingContext {
    /// Build a context over `device` with a swap chain bound to `surface`.
    ///
    /// All upload arenas are allocated here, sized from `settings`; nothing
    /// grows mid-frame.
    pub fn new(
        device: SharedDevice,
        surface: Arc<dyn NativeSurface>,
        settings: RenderSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let swap_chain = SwapChainHandle::new(
            device.clone(),
            surface,
            settings.back_buffer_count,
            settings.present_mode,
        )?;

        let mut slots = Vec::with_capacity(settings.frames_in_flight as usize);
        for _ in 0..settings.frames_in_flight {
            slots.push(FrameSlot {
                fence_value: 0,
                constants: UploadBuffer::new(
                    &*device,
                    "frame_constants",
                    BufferUsage::Constant,
                    settings.max_objects,
                )?,
                vertices: UploadBuffer::new(
                    &*device,
                    "frame_vertices",
                    BufferUsage::Vertex,
                    settings.max_vertices,
                )?,
                indices: UploadBuffer::new(
                    &*device,
                    "frame_indices",
                    BufferUsage::Index,
                    settings.max_indices,
                )?,
                constants_cursor: 0,
                vertices_cursor: 0,
                indices_cursor: 0,
            });
        }

        log::info!(
            "rendering context: {} frame slots, {} back-buffers at {}",
            slots.len(),
            swap_chain.buffer_count(),
            swap_chain.extent()
        );

        Ok(Self {
            device,
            swap_chain,
            settings,
            slots,
            slot_index: 0,
            next_fence: 1,
            frame_count: 0,
            recording: false,
            bound_pipeline: None,
            tracker: StateTracker::new(),
            commands: Vec::new(),
            // Matches the engine's default clear color.
            clear_color: [0.5, 0.5, 0.75, 1.0],
        })
    }

    fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.fence_timeout_ms)
    }

    fn require_recording(&self) -> Result<()> {
        if self.recording {
            Ok(())
        } else {
            Err(Error::FrameLifecycle("no frame open; call begin_frame first"))
        }
    }

    /// Open the next frame slot for recording.
    ///
    /// Blocks only when the slot's previous frame has not completed on the
    /// GPU (bounded wait on its fence watermark). Fails with
    /// [`Error::DeviceLost`] on device removal or a hung fence.
    pub fn begin_frame(&mut self) -> Result<()> {
        if self.recording {
            return Err(Error::FrameLifecycle(
                "begin_frame while a frame is already open",
            ));
        }
        if let DeviceStatus::Lost(reason) = self.device.status() {
            return Err(Error::DeviceLost(reason));
        }

        let slot_index = (self.frame_count % self.slots.len() as u64) as usize;
        let pending = self.slots[slot_index].fence_value;
        if pending > self.device.completed_fence() {
            log::trace!("slot {slot_index} in flight; waiting for fence {pending}");
            let timeout = self.fence_timeout();
            self.device.wait_fence(pending, timeout)?;
        }

        let slot = &mut self.slots[slot_index];
        slot.reset_cursors();
        self.slot_index = slot_index;
        self.commands.clear();
        self.tracker.reset();
        self.tracker
            .register(self.swap_chain.current_back_buffer(), ResourceState::Present);
        self.tracker
            .register(slot.constants.resource(), ResourceState::GenericRead);
        self.tracker
            .register(slot.vertices.resource(), ResourceState::GenericRead);
        self.tracker
            .register(slot.indices.resource(), ResourceState::GenericRead);
        self.bound_pipeline = None;
        self.recording = true;
        Ok(())
    }

    /// Copy per-frame data into the current slot's upload arena.
    ///
    /// Returns a range usable for binding draws recorded later this frame.
    /// Fails with [`Error::CapacityExceeded`] when the arena's fixed capacity
    /// would overflow — a sizing error, not a runtime-recoverable one.
    pub fn upload(&mut self, data: UploadData<'_>) -> Result<UploadRange> {
        self.require_recording()?;
        let kind = data.kind();
        let slot = &mut self.slots[self.slot_index];
        let range = match data {
            UploadData::Constants(values) => {
                Self::push_upload(&mut slot.constants, &mut slot.constants_cursor, values, kind)?
            }
            UploadData::Vertices(values) => {
                Self::push_upload(&mut slot.vertices, &mut slot.vertices_cursor, values, kind)?
            }
            UploadData::Indices(values) => {
                Self::push_upload(&mut slot.indices, &mut slot.indices_cursor, values, kind)?
            }
        };
        log::trace!(
            "uploaded {} {kind} elements at offset {}",
            range.count,
            range.address.offset
        );
        Ok(range)
    }

    fn push_upload<T: Pod, const ALIGNED: bool>(
        arena: &mut UploadBuffer<T, ALIGNED>,
        cursor: &mut u32,
        values: &[T],
        kind: UploadKind,
    ) -> Result<UploadRange> {
        let requested = *cursor + values.len() as u32;
        if requested > arena.capacity() {
            return Err(Error::CapacityExceeded {
                kind,
                requested,
                capacity: arena.capacity(),
            });
        }
        arena.write_slice(*cursor, values)?;
        let stride = UploadBuffer::<T, ALIGNED>::STRIDE;
        let range = UploadRange {
            address: GpuAddress {
                buffer: arena.resource(),
                offset: *cursor as u64 * stride,
            },
            first: *cursor,
            count: values.len() as u32,
            stride: stride as u32,
        };
        *cursor = requested;
        Ok(range)
    }

    /// Record a pipeline bind for subsequent draws.
    pub fn bind_shader(&mut self, shader: &Arc<Shader>) -> Result<()> {
        self.require_recording()?;
        self.bound_pipeline = Some(shader.pipeline());
        self.commands.push(Command::SetPipeline(shader.pipeline()));
        Ok(())
    }

    /// Record a resource state transition barrier.
    ///
    /// `from` must match the resource's tracked state; transitions within one
    /// frame form a single linear path with no skipped steps.
    pub fn transition(
        &mut self,
        resource: ResourceId,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<()> {
        self.require_recording()?;
        self.tracker.transition(resource, from, to)?;
        self.commands.push(Command::Transition { resource, from, to });
        Ok(())
    }

    /// Record one draw against the current back-buffer.
    ///
    /// The back-buffer must have been transitioned to render-target state
    /// first; referenced upload ranges must come from this frame's arenas.
    pub fn draw(&mut self, call: &DrawCall) -> Result<()> {
        self.require_recording()?;
        if self.bound_pipeline.is_none() {
            return Err(Error::FrameLifecycle("draw with no shader bound"));
        }

        let target = self.swap_chain.current_back_buffer();
        self.tracker.expect(target, ResourceState::RenderTarget)?;
        self.tracker
            .expect(call.vertices.address.buffer, ResourceState::GenericRead)?;
        if let Some(indices) = call.indices {
            self.tracker
                .expect(indices.address.buffer, ResourceState::GenericRead)?;
        }
        if let Some(constants) = call.constants {
            self.tracker
                .expect(constants.buffer, ResourceState::GenericRead)?;
        }

        self.commands.push(Command::SetVertexBuffer {
            binding: call.vertices.address,
            stride: call.vertices.stride,
        });
        if let Some(constants) = call.constants {
            self.commands.push(Command::SetConstants {
                slot: 0,
                binding: constants,
            });
        }
        match call.indices {
            Some(indices) => {
                self.commands.push(Command::SetIndexBuffer {
                    binding: indices.address,
                    format: IndexFormat::Uint32,
                });
                self.commands.push(Command::DrawIndexed {
                    index_count: indices.count,
                    instance_count: call.instance_count,
                    first_index: 0,
                    base_vertex: 0,
                });
            }
            None => {
                self.commands.push(Command::Draw {
                    vertex_count: call.vertices.count,
                    instance_count: call.instance_count,
                    first_vertex: 0,
                });
            }
        }
        Ok(())
    }

    /// Close recording, submit to the queue, signal the slot's fence, and
    /// present.
    ///
    /// This is the single commit point. A present failure after submission is
    /// reported, but the submitted GPU work stands: the fence and frame slot
    /// advance regardless.
    pub fn end_frame(&mut self) -> Result<()> {
        self.require_recording()?;

        let target = self.swap_chain.current_back_buffer();
        match self.tracker.current(target) {
            ResourceState::Present => {}
            ResourceState::RenderTarget => {
                // Counterpart of the host's frame-open transition.
                self.tracker.transition(
                    target,
                    ResourceState::RenderTarget,
                    ResourceState::Present,
                )?;
                self.commands.push(Command::Transition {
                    resource: target,
                    from: ResourceState::RenderTarget,
                    to: ResourceState::Present,
                });
            }
            actual => {
                return Err(Error::InvalidResourceState {
                    resource: target,
                    expected: ResourceState::Present,
                    actual,
                });
            }
        }
        self.recording = false;

        let fence = self.next_fence;
        {
            let slot = &self.slots[self.slot_index];
            let flushes = [
                UploadFlush {
                    buffer: slot.constants.resource(),
                    bytes: slot.constants.contents(slot.constants_cursor),
                },
                UploadFlush {
                    buffer: slot.vertices.resource(),
                    bytes: slot.vertices.contents(slot.vertices_cursor),
                },
                UploadFlush {
                    buffer: slot.indices.resource(),
                    bytes: slot.indices.contents(slot.indices_cursor),
                },
            ];
            let used: Vec<UploadFlush<'_>> = flushes
                .into_iter()
                .filter(|flush| !flush.bytes.is_empty())
                .collect();
            self.device.submit(Submission {
                signal_fence: fence,
                target,
                clear_color: self.clear_color,
                commands: &self.commands,
                uploads: &used,
            })?;
        }
        self.next_fence += 1;
        self.slots[self.slot_index].fence_value = fence;
        self.frame_count += 1;
        log::trace!(
            "frame {} submitted from slot {} (fence {fence})",
            self.frame_count,
            self.slot_index
        );

        if let Err(err) = self.swap_chain.present(self.settings.sync_interval) {
            // Already on the queue; nothing to roll back.
            log::warn!("present failed after submission: {err}");
            return Err(err);
        }
        Ok(())
    }

    /// Block until every submitted frame has completed on the GPU.
    pub fn flush(&self) -> Result<()> {
        let last = self.next_fence - 1;
        if last == 0 {
            return Ok(());
        }
        self.device.wait_fence(last, self.fence_timeout())
    }

    /// Host notification that the surface changed size. Drains in-flight
    /// frames, then recreates the back-buffers at the new extent.
    pub fn resize_surface(&mut self, width: u32, height: u32) -> Result<()> {
        if self.recording {
            return Err(Error::FrameLifecycle("resize during an open frame"));
        }
        let extent = Extent::new(width, height);
        if extent == self.swap_chain.extent() {
            return Ok(());
        }
        self.flush()?;
        self.swap_chain.resize(extent)
    }

    /// Recover from a lost surface by binding a fresh one, preserving the
    /// device session, shaders, and upload arenas.
    pub fn recreate_swap_chain(&mut self, surface: Arc<dyn NativeSurface>) -> Result<()> {
        if self.recording {
            return Err(Error::FrameLifecycle(
                "swap chain recreation during an open frame",
            ));
        }
        self.flush()?;
        self.swap_chain = SwapChainHandle::new(
            self.device.clone(),
            surface,
            self.settings.back_buffer_count,
            self.settings.present_mode,
        )?;
        Ok(())
    }

    pub fn set_clear_color(&mut self, color: [f64; 4]) {
        self.clear_color = color;
    }

    pub fn swap_chain(&self) -> &SwapChainHandle {
        &self.swap_chain
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Completed begin/end cycles.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

impl Drop for RenderingContext {
    fn drop(&mut self) {
        // Upload arenas must outlive any frame still reading them.
        if let Err(err) = self.flush() {
            log::warn!("context teardown flush failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::software::{SoftwareDevice, VirtualSurface};
    use crate::render::device::DeviceSession;
    use crate::render::shader::{object_constants_layout, vertex_color_layout};

    fn context_with(settings: RenderSettings) -> (RenderingContext, Arc<SoftwareDevice>) {
        let device = Arc::new(SoftwareDevice::new());
        let surface = VirtualSurface::new(Extent::new(800, 600));
        let context =
            RenderingContext::new(device.clone(), surface, settings).unwrap();
        (context, device)
    }

    fn context() -> (RenderingContext, Arc<SoftwareDevice>) {
        context_with(RenderSettings {
            fence_timeout_ms: 1000,
            ..RenderSettings::default()
        })
    }

    fn test_shader(device: &SoftwareDevice) -> Arc<Shader> {
        Shader::load(
            device,
            "basic",
            b"blob",
            vertex_color_layout(),
            object_constants_layout(),
        )
        .unwrap()
    }

    fn unit_triangle() -> [Vertex; 3] {
        [
            Vertex::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 1.0]),
            Vertex::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0, 1.0]),
            Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0, 1.0]),
        ]
    }

    #[test]
    fn test_recording_requires_open_frame() {
        let (mut context, device) = context();
        let shader = test_shader(&device);

        assert!(matches!(
            context.upload(UploadData::Indices(&[0, 1, 2])),
            Err(Error::FrameLifecycle(_))
        ));
        assert!(matches!(
            context.bind_shader(&shader),
            Err(Error::FrameLifecycle(_))
        ));
        assert!(matches!(
            context.end_frame(),
            Err(Error::FrameLifecycle(_))
        ));
    }

    #[test]
    fn test_double_begin_rejected() {
        let (mut context, _device) = context();
        context.begin_frame().unwrap();
        assert!(matches!(
            context.begin_frame(),
            Err(Error::FrameLifecycle(_))
        ));
    }

    #[test]
    fn test_upload_capacity_exceeded() {
        let (mut context, _device) = context_with(RenderSettings {
            max_objects: 2,
            fence_timeout_ms: 1000,
            ..RenderSettings::default()
        });
        context.begin_frame().unwrap();

        let constants = [ObjectConstants::default(); 3];
        let err = context
            .upload(UploadData::Constants(&constants))
            .unwrap_err();
        match err {
            Error::CapacityExceeded {
                kind,
                requested,
                capacity,
            } => {
                assert_eq!(kind, UploadKind::Constants);
                assert_eq!(requested, 3);
                assert_eq!(capacity, 2);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Two single uploads fit; the third overflows.
        context
            .upload(UploadData::Constants(&constants[..1]))
            .unwrap();
        context
            .upload(UploadData::Constants(&constants[..1]))
            .unwrap();
        assert!(
            context
                .upload(UploadData::Constants(&constants[..1]))
                .is_err()
        );
    }

    #[test]
    fn test_constant_uploads_are_aligned() {
        let (mut context, _device) = context();
        context.begin_frame().unwrap();

        let constants = [ObjectConstants::default()];
        let first = context.upload(UploadData::Constants(&constants)).unwrap();
        let second = context.upload(UploadData::Constants(&constants)).unwrap();

        assert_eq!(first.address.offset, 0);
        assert_eq!(second.address.offset - first.address.offset, 256);
    }

    #[test]
    fn test_draw_without_transition_fails() {
        let (mut context, device) = context();
        let shader = test_shader(&device);
        context.begin_frame().unwrap();

        let vertices = context
            .upload(UploadData::Vertices(&unit_triangle()))
            .unwrap();
        context.bind_shader(&shader).unwrap();

        let err = context.draw(&DrawCall::new(vertices)).unwrap_err();
        match err {
            Error::InvalidResourceState {
                expected, actual, ..
            } => {
                assert_eq!(expected, ResourceState::RenderTarget);
                assert_eq!(actual, ResourceState::Present);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_frame_with_transition_draw_and_present() {
        let (mut context, device) = context();
        let shader = test_shader(&device);

        context.begin_frame().unwrap();
        let target = context.swap_chain().current_back_buffer();
        context
            .transition(target, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();

        let vertices = context
            .upload(UploadData::Vertices(&unit_triangle()))
            .unwrap();
        let indices = context.upload(UploadData::Indices(&[0, 1, 2])).unwrap();
        let constants = context
            .upload(UploadData::Constants(&[ObjectConstants::default()]))
            .unwrap();

        context.bind_shader(&shader).unwrap();
        context
            .draw(
                &DrawCall::new(vertices)
                    .with_indices(indices)
                    .with_constants(constants.address),
            )
            .unwrap();
        context.end_frame().unwrap();

        assert_eq!(context.frame_count(), 1);
        assert_eq!(context.swap_chain().current_index(), 1);
        // The closing barrier back to present is recorded automatically.
        assert!(matches!(
            context.commands.last(),
            Some(Command::Transition {
                from: ResourceState::RenderTarget,
                to: ResourceState::Present,
                ..
            })
        ));
    }

    #[test]
    fn test_draw_requires_bound_shader() {
        let (mut context, _device) = context();
        context.begin_frame().unwrap();
        let target = context.swap_chain().current_back_buffer();
        context
            .transition(target, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        let vertices = context
            .upload(UploadData::Vertices(&unit_triangle()))
            .unwrap();

        assert!(matches!(
            context.draw(&DrawCall::new(vertices)),
            Err(Error::FrameLifecycle(_))
        ));
    }

    #[test]
    fn test_frames_proceed_while_gpu_keeps_up() {
        let (mut context, _device) = context();
        for _ in 0..5 {
            context.begin_frame().unwrap();
            let target = context.swap_chain().current_back_buffer();
            context
                .transition(target, ResourceState::Present, ResourceState::RenderTarget)
                .unwrap();
            context.end_frame().unwrap();
        }
        assert_eq!(context.frame_count(), 5);
    }

    #[test]
    fn test_device_lost_surfaces_at_begin() {
        let (mut context, device) = context();
        device.mark_lost("simulated tdr");

        let err = context.begin_frame().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_present_failure_after_submit_keeps_frame() {
        let device = Arc::new(SoftwareDevice::new());
        let surface = VirtualSurface::new(Extent::new(800, 600));
        let mut context = RenderingContext::new(
            device.clone(),
            surface.clone(),
            RenderSettings {
                fence_timeout_ms: 1000,
                ..RenderSettings::default()
            },
        )
        .unwrap();

        context.begin_frame().unwrap();
        // Surface resized mid-frame: present will fail stale.
        surface.set_extent(Extent::new(400, 300));
        let err = context.end_frame().unwrap_err();
        assert!(err.is_swap_chain_recoverable());

        // Submission stands: the frame committed and its fence signals.
        assert_eq!(context.frame_count(), 1);
        context.flush().unwrap();
        assert_eq!(device.completed_fence(), 1);

        // Host recovers by resizing, then the next frame presents.
        context.resize_surface(400, 300).unwrap();
        context.begin_frame().unwrap();
        context.end_frame().unwrap();
    }

    #[test]
    fn test_resize_to_current_extent_is_noop() {
        let (mut context, _device) = context();
        context.resize_surface(800, 600).unwrap();
        assert_eq!(context.swap_chain().extent(), Extent::new(800, 600));
    }

    #[test]
    fn test_resize_rejected_mid_frame() {
        let (mut context, _device) = context();
        context.begin_frame().unwrap();
        assert!(matches!(
            context.resize_surface(1024, 768),
            Err(Error::FrameLifecycle(_))
        ));
    }
}
