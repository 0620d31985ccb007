//! CPU-writable upload buffers for per-frame GPU data

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::device::{BufferDesc, BufferUsage, DeviceSession, GpuAddress, ResourceId};

/// Minimum byte alignment for data bound as shader constants.
pub const MIN_CB_ALIGNMENT: u64 = 256;

/// Round `size` up to the next constant-buffer alignment boundary.
pub const fn constant_buffer_size(size: u64) -> u64 {
    (size + MIN_CB_ALIGNMENT - 1) & !(MIN_CB_ALIGNMENT - 1)
}

/// A CPU-writable, GPU-readable staging region for one payload type.
///
/// `ALIGNED = true` pads every element out to [`MIN_CB_ALIGNMENT`] so each can
/// be bound as a shader constant; `ALIGNED = false` packs elements at the
/// natural stride of `T` (vertex and index streams).
///
/// Capacity is fixed at creation: GPU-visible allocations are expensive to
/// resize, so callers size for the worst-case per-frame element count. The GPU
/// reads this memory only during the frame it was written for; cross-frame
/// reuse is gated by the owning frame slot's fence.
pub struct UploadBuffer<T, const ALIGNED: bool> {
    buffer: ResourceId,
    bytes: Box<[u8]>,
    capacity: u32,
    _marker: PhantomData<T>,
}

/// Upload buffer for data bound as shader constants (aligned elements).
pub type ConstantUploadBuffer<T> = UploadBuffer<T, true>;

/// Upload buffer for vertex or index streams (naturally packed).
pub type LinearUploadBuffer<T> = UploadBuffer<T, false>;

impl<T: Pod, const ALIGNED: bool> UploadBuffer<T, ALIGNED> {
    /// Byte stride between consecutive elements, computed once at compile
    /// time: `round_up(size_of::<T>(), MIN_CB_ALIGNMENT)` when aligned, the
    /// natural size otherwise.
    pub const STRIDE: u64 = if ALIGNED {
        constant_buffer_size(std::mem::size_of::<T>() as u64)
    } else {
        std::mem::size_of::<T>() as u64
    };

    /// Allocate a buffer holding `capacity` elements on the device's upload heap.
    pub fn new(
        device: &dyn DeviceSession,
        label: &str,
        usage: BufferUsage,
        capacity: u32,
    ) -> Result<Self> {
        let size = Self::STRIDE * capacity as u64;
        let buffer = device.create_buffer(&BufferDesc { label, size, usage })?;
        Ok(Self {
            buffer,
            bytes: vec![0u8; size as usize].into_boxed_slice(),
            capacity,
            _marker: PhantomData,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Device resource backing this buffer.
    pub fn resource(&self) -> ResourceId {
        self.buffer
    }

    /// Copy `value` to the aligned offset for `index`.
    ///
    /// Fails with [`Error::IndexOutOfRange`] if `index >= capacity`; nothing
    /// is written on failure.
    pub fn write(&mut self, index: u32, value: &T) -> Result<()> {
        if index >= self.capacity {
            return Err(Error::IndexOutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        let offset = index as usize * Self::STRIDE as usize;
        self.bytes[offset..offset + std::mem::size_of::<T>()]
            .copy_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }

    /// Copy a run of elements starting at `first`.
    pub fn write_slice(&mut self, first: u32, values: &[T]) -> Result<()> {
        for (i, value) in values.iter().enumerate() {
            self.write(first + i as u32, value)?;
        }
        Ok(())
    }

    /// Device-visible address of element `index`, for binding.
    ///
    /// The address maps deterministically to `index * STRIDE` and is valid
    /// only while the owning frame slot is active.
    pub fn gpu_address(&self, index: u32) -> GpuAddress {
        debug_assert!(index < self.capacity);
        GpuAddress {
            buffer: self.buffer,
            offset: index as u64 * Self::STRIDE,
        }
    }

    /// CPU contents of the first `count` elements, for the submit-time flush.
    pub fn contents(&self, count: u32) -> &[u8] {
        let len = (count.min(self.capacity) as u64 * Self::STRIDE) as usize;
        &self.bytes[..len]
    }
}
