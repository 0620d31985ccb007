//! Sable - a GPU command and resource layer for real-time rendering

pub mod core;
pub mod render;
