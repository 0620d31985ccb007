//! Window surface adapter for winit

use std::sync::Arc;

use winit::window::Window as WinitWindow;

use crate::core::types::Extent;
use crate::render::device::NativeSurface;

/// Adapter exposing a winit window as a surface the render layer can size
/// its swap chain against.
pub struct WindowSurface {
    window: Arc<WinitWindow>,
}

impl WindowSurface {
    pub fn new(window: Arc<WinitWindow>) -> Arc<Self> {
        Arc::new(Self { window })
    }

    pub fn window(&self) -> &Arc<WinitWindow> {
        &self.window
    }
}

impl NativeSurface for WindowSurface {
    fn extent(&self) -> Option<Extent> {
        let size = self.window.inner_size();
        Some(Extent::new(size.width, size.height))
    }
}
