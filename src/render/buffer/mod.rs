//! GPU buffer management

pub mod upload;

pub use upload::{
    ConstantUploadBuffer, LinearUploadBuffer, MIN_CB_ALIGNMENT, UploadBuffer, constant_buffer_size,
};
