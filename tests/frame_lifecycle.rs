//! End-to-end frame pacing over the software device

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sable::core::types::Extent;
use sable::render::command::{DrawCall, UploadData};
use sable::render::device::software::{SoftwareDevice, VirtualSurface};
use sable::render::device::DeviceSession;
use sable::render::mesh::{ObjectConstants, Vertex};
use sable::render::shader::{object_constants_layout, vertex_color_layout};
use sable::render::state::ResourceState;
use sable::render::{RenderSettings, RenderingContext, Shader};

const TRIANGLE: [Vertex; 3] = [
    Vertex::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 1.0]),
    Vertex::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0, 1.0]),
    Vertex::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0, 1.0]),
];

fn new_context(settings: RenderSettings) -> (RenderingContext, Arc<SoftwareDevice>) {
    let device = Arc::new(SoftwareDevice::new());
    let surface = VirtualSurface::new(Extent::new(800, 600));
    let context = RenderingContext::new(device.clone(), surface, settings).unwrap();
    (context, device)
}

fn load_shader(device: &SoftwareDevice) -> Arc<Shader> {
    Shader::load(
        device,
        "basic",
        b"blob",
        vertex_color_layout(),
        object_constants_layout(),
    )
    .unwrap()
}

/// One full begin/upload/draw/end cycle; returns the back-buffer index the
/// frame rendered into.
fn draw_frame(context: &mut RenderingContext, shader: &Arc<Shader>) -> u32 {
    context.begin_frame().unwrap();
    let index = context.swap_chain().current_index();
    let target = context.swap_chain().current_back_buffer();
    context
        .transition(target, ResourceState::Present, ResourceState::RenderTarget)
        .unwrap();
    let vertices = context.upload(UploadData::Vertices(&TRIANGLE)).unwrap();
    let constants = context
        .upload(UploadData::Constants(&[ObjectConstants::default()]))
        .unwrap();
    context.bind_shader(shader).unwrap();
    context
        .draw(&DrawCall::new(vertices).with_constants(constants.address))
        .unwrap();
    context.end_frame().unwrap();
    index
}

fn run_frame(context: &mut RenderingContext) {
    context.begin_frame().unwrap();
    let target = context.swap_chain().current_back_buffer();
    context
        .transition(target, ResourceState::Present, ResourceState::RenderTarget)
        .unwrap();
    context.end_frame().unwrap();
}

// 2 slots, 2 back-buffers, three full frames with no host throttling: the
// third begin_frame must wait for frame 1's fence, and the presented
// back-buffer indices come out 0, 1, 0.
#[test]
fn test_third_frame_blocks_then_presents_cycle() {
    let (mut context, device) = new_context(RenderSettings {
        frames_in_flight: 2,
        back_buffer_count: 2,
        fence_timeout_ms: 5000,
        ..RenderSettings::default()
    });
    let shader = load_shader(&device);

    // Stall the executor so submitted frames never complete.
    device.pause();
    let mut indices = vec![
        draw_frame(&mut context, &shader),
        draw_frame(&mut context, &shader),
    ];

    // Both slots are now in flight; the third frame must wait for the first.
    let entered = Arc::new(AtomicBool::new(false));
    let entered_clone = entered.clone();
    let worker = thread::spawn(move || {
        let index = draw_frame(&mut context, &shader);
        entered_clone.store(true, Ordering::SeqCst);
        (context, index)
    });

    thread::sleep(Duration::from_millis(150));
    assert!(
        !entered.load(Ordering::SeqCst),
        "begin_frame returned while both slots were still in flight"
    );

    device.resume();
    let (context, third_index) = worker.join().unwrap();
    assert!(entered.load(Ordering::SeqCst));
    indices.push(third_index);

    assert_eq!(indices, vec![0, 1, 0]);
    assert_eq!(context.frame_count(), 3);
    assert_eq!(device.presented_frames(), 3);
}

#[test]
fn test_saturated_slots_time_out_as_device_lost() {
    let (mut context, device) = new_context(RenderSettings {
        frames_in_flight: 2,
        fence_timeout_ms: 50,
        ..RenderSettings::default()
    });

    device.pause();
    run_frame(&mut context);
    run_frame(&mut context);

    let err = context.begin_frame().unwrap_err();
    assert!(err.is_fatal());

    device.resume();
}

#[test]
fn test_presents_cycle_back_buffer_indices() {
    let (mut context, device) = new_context(RenderSettings {
        frames_in_flight: 2,
        back_buffer_count: 2,
        fence_timeout_ms: 1000,
        ..RenderSettings::default()
    });

    let mut presented_indices = Vec::new();
    for _ in 0..3 {
        context.begin_frame().unwrap();
        presented_indices.push(context.swap_chain().current_index());
        let target = context.swap_chain().current_back_buffer();
        context
            .transition(target, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        context.end_frame().unwrap();
    }

    assert_eq!(presented_indices, vec![0, 1, 0]);
    assert_eq!(device.presented_frames(), 3);
}

#[test]
fn test_flush_drains_every_submitted_frame() {
    let (mut context, device) = new_context(RenderSettings {
        fence_timeout_ms: 1000,
        ..RenderSettings::default()
    });

    for _ in 0..3 {
        run_frame(&mut context);
    }
    context.flush().unwrap();
    assert_eq!(device.completed_fence(), 3);
}
