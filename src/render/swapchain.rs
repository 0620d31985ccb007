//! Swap chain handle and back-buffer rotation

use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::{Extent, Result};
use crate::render::device::{NativeSurface, ResourceId, SharedDevice, SwapChainDesc};
use crate::render::settings::PresentMode;

/// Handle to the presentable back-buffer chain bound to one native surface.
///
/// The index always stays in `[0, buffer_count)` and advances exactly once
/// per successfully presented frame.
pub struct SwapChainHandle {
    device: SharedDevice,
    surface: Arc<dyn NativeSurface>,
    back_buffers: Vec<ResourceId>,
    index: u32,
    extent: Extent,
    present_mode: PresentMode,
}

impl SwapChainHandle {
    /// Create a chain sized to the surface's current dimensions.
    pub fn new(
        device: SharedDevice,
        surface: Arc<dyn NativeSurface>,
        buffer_count: u32,
        present_mode: PresentMode,
    ) -> Result<Self> {
        let extent = surface
            .extent()
            .ok_or_else(|| Error::SurfaceLost("surface destroyed before swap chain creation".into()))?;
        let back_buffers = device.create_swap_chain(&SwapChainDesc {
            extent,
            buffer_count,
            present_mode,
        })?;
        log::info!(
            "swap chain created: {} buffers at {} ({:?})",
            back_buffers.len(),
            extent,
            present_mode
        );
        Ok(Self {
            device,
            surface,
            back_buffers,
            index: 0,
            extent,
            present_mode,
        })
    }

    pub fn buffer_count(&self) -> u32 {
        self.back_buffers.len() as u32
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    /// Index of the currently presentable buffer.
    pub fn current_index(&self) -> u32 {
        self.index
    }

    /// Resource for the active back-buffer.
    pub fn current_back_buffer(&self) -> ResourceId {
        self.back_buffers[self.index as usize]
    }

    /// Submit the current buffer for display, then advance the index.
    ///
    /// Fails with [`Error::SurfaceLost`] when the native surface is gone
    /// (recreate the chain) and [`Error::StaleSwapChain`] when the surface
    /// was resized underneath it (resize the chain first). The index does
    /// not advance on failure.
    pub fn present(&mut self, sync_interval: u32) -> Result<()> {
        let surface_extent = self
            .surface
            .extent()
            .ok_or_else(|| Error::SurfaceLost("native surface destroyed".into()))?;
        if surface_extent != self.extent {
            return Err(Error::StaleSwapChain {
                chain: self.extent,
                surface: surface_extent,
            });
        }

        self.device.present(sync_interval)?;
        self.index = (self.index + 1) % self.buffer_count();
        Ok(())
    }

    /// Release all back-buffers and recreate them at `extent`.
    ///
    /// Resizing to the current extent is a no-op. A zero-area extent
    /// (minimized window) is recorded but not applied; presents keep failing
    /// stale until a real size arrives.
    pub fn resize(&mut self, extent: Extent) -> Result<()> {
        if extent == self.extent {
            return Ok(());
        }
        if extent.is_empty() {
            log::debug!("ignoring resize to empty extent {extent}");
            return Ok(());
        }

        self.back_buffers = self.device.resize_swap_chain(extent)?;
        log::info!("swap chain resized: {} -> {}", self.extent, extent);
        self.extent = extent;
        self.index = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::software::{SoftwareDevice, VirtualSurface};

    fn chain(buffer_count: u32) -> (SwapChainHandle, Arc<VirtualSurface>) {
        let device: SharedDevice = Arc::new(SoftwareDevice::new());
        let surface = VirtualSurface::new(Extent::new(800, 600));
        let chain = SwapChainHandle::new(
            device,
            surface.clone(),
            buffer_count,
            PresentMode::Fifo,
        )
        .unwrap();
        (chain, surface)
    }

    #[test]
    fn test_index_cycles_modulo_buffer_count() {
        let (mut chain, _surface) = chain(3);
        assert_eq!(chain.current_index(), 0);

        let start = chain.current_back_buffer();
        for expected in [1, 2, 0] {
            chain.present(1).unwrap();
            assert_eq!(chain.current_index(), expected);
        }
        // Full cycle returns to the starting buffer
        assert_eq!(chain.current_back_buffer(), start);
    }

    #[test]
    fn test_present_after_surface_resize_is_stale() {
        let (mut chain, surface) = chain(2);
        surface.set_extent(Extent::new(1024, 768));

        let err = chain.present(1).unwrap_err();
        match err {
            Error::StaleSwapChain { chain, surface } => {
                assert_eq!(chain, Extent::new(800, 600));
                assert_eq!(surface, Extent::new(1024, 768));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Index must not advance on failure
        assert_eq!(chain.current_index(), 0);
    }

    #[test]
    fn test_resize_recovers_stale_chain() {
        let (mut chain, surface) = chain(2);
        surface.set_extent(Extent::new(1024, 768));
        assert!(chain.present(1).is_err());

        chain.resize(Extent::new(1024, 768)).unwrap();
        assert_eq!(chain.extent(), Extent::new(1024, 768));
        assert_eq!(chain.current_index(), 0);
        chain.present(1).unwrap();
    }

    #[test]
    fn test_resize_recreates_back_buffers() {
        let (mut chain, _surface) = chain(2);
        let before = chain.current_back_buffer();
        chain.resize(Extent::new(640, 480)).unwrap();
        assert_ne!(chain.current_back_buffer(), before);
    }

    #[test]
    fn test_resize_to_same_extent_is_noop() {
        let (mut chain, _surface) = chain(2);
        let before = chain.current_back_buffer();
        chain.resize(Extent::new(800, 600)).unwrap();
        assert_eq!(chain.current_back_buffer(), before);
    }

    #[test]
    fn test_destroyed_surface_is_lost() {
        let (mut chain, surface) = chain(2);
        surface.destroy();
        assert!(matches!(chain.present(1), Err(Error::SurfaceLost(_))));
    }
}
