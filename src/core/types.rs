//! Core type aliases and re-exports

use std::fmt;

pub use glam::{Mat4, Quat, Vec3, Vec4};

/// Standard Result type for the engine
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Pixel dimensions of a surface or back-buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const ZERO: Extent = Extent {
        width: 0,
        height: 0,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-area extent (minimized window); not presentable.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_empty() {
        assert!(Extent::ZERO.is_empty());
        assert!(Extent::new(0, 600).is_empty());
        assert!(!Extent::new(800, 600).is_empty());
    }

    #[test]
    fn test_extent_display() {
        assert_eq!(Extent::new(1280, 720).to_string(), "1280x720");
    }
}
