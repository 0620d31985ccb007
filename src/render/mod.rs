//! Rendering system and GPU interfaces

pub mod buffer;
pub mod command;
pub mod context;
pub mod device;
pub mod mesh;
pub mod settings;
pub mod shader;
pub mod state;
pub mod swapchain;
pub mod window;

pub use context::RenderingContext;
pub use settings::{PresentMode, RenderSettings};
pub use shader::Shader;
pub use swapchain::SwapChainHandle;
