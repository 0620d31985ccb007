//! Spinning cube demo host

use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use sable::core::time::FrameTimer;
use sable::core::types::{Mat4, Vec3};
use sable::core::Error;
use sable::render::command::{DrawCall, UploadData};
use sable::render::device::gpu::GpuDevice;
use sable::render::mesh::{ObjectConstants, Vertex};
use sable::render::shader::{object_constants_layout, vertex_color_layout};
use sable::render::state::ResourceState;
use sable::render::window::WindowSurface;
use sable::render::{RenderSettings, RenderingContext, Shader};

const CUBE_VERTICES: [Vertex; 8] = [
    Vertex::new([-1.0, -1.0, -1.0], [0.0, 0.0, 0.0, 1.0]),
    Vertex::new([-1.0, 1.0, -1.0], [0.0, 1.0, 0.0, 1.0]),
    Vertex::new([1.0, 1.0, -1.0], [1.0, 1.0, 0.0, 1.0]),
    Vertex::new([1.0, -1.0, -1.0], [1.0, 0.0, 0.0, 1.0]),
    Vertex::new([-1.0, -1.0, 1.0], [0.0, 0.0, 1.0, 1.0]),
    Vertex::new([-1.0, 1.0, 1.0], [0.0, 1.0, 1.0, 1.0]),
    Vertex::new([1.0, 1.0, 1.0], [1.0, 1.0, 1.0, 1.0]),
    Vertex::new([1.0, -1.0, 1.0], [1.0, 0.0, 1.0, 1.0]),
];

const CUBE_INDICES: [u32; 36] = [
    0, 1, 2, 0, 2, 3, // front
    4, 6, 5, 4, 7, 6, // back
    4, 5, 1, 4, 1, 0, // left
    3, 2, 6, 3, 6, 7, // right
    1, 5, 6, 1, 6, 2, // top
    4, 0, 3, 4, 3, 7, // bottom
];

struct Renderer {
    context: RenderingContext,
    shader: Arc<Shader>,
}

struct App {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    timer: FrameTimer,
    angle: f32,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            timer: FrameTimer::new(),
            angle: 0.0,
        }
    }

    fn init_renderer(&mut self, window: Arc<Window>) -> sable::core::types::Result<Renderer> {
        let device = Arc::new(pollster::block_on(GpuDevice::new(window.clone()))?);
        let surface = WindowSurface::new(window);
        let context = RenderingContext::new(device.clone(), surface, RenderSettings::default())?;
        let shader = Shader::load(
            &*device,
            "basic",
            include_str!("../shaders/basic.wgsl").as_bytes(),
            vertex_color_layout(),
            object_constants_layout(),
        )?;
        Ok(Renderer { context, shader })
    }

    fn render_frame(&mut self) -> sable::core::types::Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        self.timer.tick();
        self.angle += self.timer.delta_secs();

        let context = &mut renderer.context;
        context.begin_frame()?;

        let extent = context.swap_chain().extent();
        let view = Mat4::look_at_lh(
            Vec3::new(0.0, 2.0, -6.0),
            Vec3::ZERO,
            Vec3::Y,
        );
        let projection =
            Mat4::perspective_lh(std::f32::consts::FRAC_PI_4, extent.aspect_ratio(), 0.1, 100.0);
        let world = Mat4::from_rotation_y(self.angle) * Mat4::from_rotation_x(self.angle * 0.5);
        let constants = ObjectConstants::from_matrix(projection * view * world);

        let vertices = context.upload(UploadData::Vertices(&CUBE_VERTICES))?;
        let indices = context.upload(UploadData::Indices(&CUBE_INDICES))?;
        let constants = context.upload(UploadData::Constants(&[constants]))?;

        let target = context.swap_chain().current_back_buffer();
        context.transition(target, ResourceState::Present, ResourceState::RenderTarget)?;
        context.bind_shader(&renderer.shader)?;
        context.draw(
            &DrawCall::new(vertices)
                .with_indices(indices)
                .with_constants(constants.address),
        )?;
        context.end_frame()?;

        if renderer.context.frame_count() % 300 == 0 {
            log::debug!("{:.1} fps", self.timer.fps());
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = WindowAttributes::default()
            .with_title("Sable - spinning cube")
            .with_inner_size(PhysicalSize::new(1280, 720));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        match self.init_renderer(window.clone()) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Renderer initialization failed: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.context.resize_surface(size.width, size.height) {
                        log::error!("Resize failed: {e}");
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                match self.render_frame() {
                    Ok(()) => {}
                    Err(Error::StaleSwapChain { surface, .. }) => {
                        // Window changed size under us; resync and carry on.
                        if let Some(renderer) = &mut self.renderer {
                            if let Err(e) = renderer
                                .context
                                .resize_surface(surface.width, surface.height)
                            {
                                log::error!("Swap chain recovery failed: {e}");
                                event_loop.exit();
                            }
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        log::error!("Device lost: {e}");
                        event_loop.exit();
                    }
                    Err(e) => {
                        log::warn!("Frame skipped: {e}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() {
    sable::core::logging::init();

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app).expect("Event loop error");
}
