//! Software device session
//!
//! A CPU stand-in for the hardware queue: submissions are executed by a
//! worker thread that advances the fence watermark, preserving the real
//! two-actor pipeline (CPU recorder / asynchronous executor) without a GPU.
//! Used by the test suite and for headless runs.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::core::error::Error;
use crate::core::types::{Extent, Result};
use crate::render::device::{
    BufferDesc, DeviceSession, DeviceStatus, NativeSurface, PipelineDesc, PipelineId, ResourceId,
    Submission, SwapChainDesc,
};

struct Job {
    signal_fence: u64,
    command_count: usize,
}

#[derive(Default)]
struct Resources {
    next_id: u64,
    buffers: HashMap<ResourceId, u64>,
    pipeline_count: u64,
    swap_chain: Option<Chain>,
}

struct Chain {
    extent: Extent,
    back_buffers: Vec<ResourceId>,
    presented: u64,
}

impl Resources {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct Inner {
    fence: Mutex<u64>,
    fence_cvar: Condvar,
    /// Executor gate; while true, queued jobs do not complete.
    paused: Mutex<bool>,
    gate_cvar: Condvar,
    lost: Mutex<Option<String>>,
    resources: Mutex<Resources>,
}

impl Inner {
    fn wait_gate(&self) {
        let mut paused = self.paused.lock().unwrap();
        while *paused {
            paused = self.gate_cvar.wait(paused).unwrap();
        }
    }

    fn lost_reason(&self) -> Option<String> {
        self.lost.lock().unwrap().clone()
    }
}

/// CPU-backed device session with an asynchronous executor thread.
pub struct SoftwareDevice {
    inner: Arc<Inner>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Option<JoinHandle<()>>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            fence: Mutex::new(0),
            fence_cvar: Condvar::new(),
            paused: Mutex::new(false),
            gate_cvar: Condvar::new(),
            lost: Mutex::new(None),
            resources: Mutex::new(Resources::default()),
        });

        let (sender, receiver) = mpsc::channel::<Job>();
        let executor = inner.clone();
        let worker = std::thread::Builder::new()
            .name("sable-executor".into())
            .spawn(move || {
                for job in receiver {
                    executor.wait_gate();
                    log::trace!(
                        "executor: frame fence {} ({} commands)",
                        job.signal_fence,
                        job.command_count
                    );
                    let mut fence = executor.fence.lock().unwrap();
                    *fence = fence.max(job.signal_fence);
                    executor.fence_cvar.notify_all();
                }
            })
            .expect("failed to spawn executor thread");

        Self {
            inner,
            sender: Mutex::new(Some(sender)),
            worker: Some(worker),
        }
    }

    /// Stall the executor: submissions queue up but their fences do not
    /// signal until [`SoftwareDevice::resume`]. Lets tests observe the
    /// frame-slot backpressure deterministically.
    pub fn pause(&self) {
        *self.inner.paused.lock().unwrap() = true;
    }

    /// Release a paused executor.
    pub fn resume(&self) {
        *self.inner.paused.lock().unwrap() = false;
        self.inner.gate_cvar.notify_all();
    }

    /// Simulate a device reset/removal.
    pub fn mark_lost(&self, reason: &str) {
        *self.inner.lost.lock().unwrap() = Some(reason.to_string());
        // Wake any waiter so it can observe the loss.
        self.inner.fence_cvar.notify_all();
    }

    /// Number of presents since the swap chain was created.
    pub fn presented_frames(&self) -> u64 {
        self.inner
            .resources
            .lock()
            .unwrap()
            .swap_chain
            .as_ref()
            .map_or(0, |chain| chain.presented)
    }

    fn ensure_healthy(&self) -> Result<()> {
        match self.inner.lost_reason() {
            Some(reason) => Err(Error::DeviceLost(reason)),
            None => Ok(()),
        }
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        // Close the channel so the executor drains and exits. The gate must
        // open too, or a paused executor never reaches the closed channel.
        self.sender.lock().unwrap().take();
        self.resume();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl DeviceSession for SoftwareDevice {
    fn status(&self) -> DeviceStatus {
        match self.inner.lost_reason() {
            Some(reason) => DeviceStatus::Lost(reason),
            None => DeviceStatus::Healthy,
        }
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<ResourceId> {
        self.ensure_healthy()?;
        if desc.size == 0 {
            return Err(Error::Config(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        let mut resources = self.inner.resources.lock().unwrap();
        let id = ResourceId::from_raw(resources.alloc_id());
        resources.buffers.insert(id, desc.size);
        log::trace!(
            "created {:?} buffer '{}' ({} bytes) as {}",
            desc.usage,
            desc.label,
            desc.size,
            id
        );
        Ok(id)
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<PipelineId> {
        self.ensure_healthy()?;
        if desc.bytecode.is_empty() {
            return Err(Error::PipelineCreation(format!(
                "shader '{}' has empty bytecode",
                desc.label
            )));
        }
        let mut resources = self.inner.resources.lock().unwrap();
        resources.pipeline_count += 1;
        Ok(PipelineId::from_raw(resources.pipeline_count))
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<Vec<ResourceId>> {
        self.ensure_healthy()?;
        if desc.extent.is_empty() {
            return Err(Error::Config(format!(
                "swap chain extent {} is empty",
                desc.extent
            )));
        }
        let mut resources = self.inner.resources.lock().unwrap();
        let back_buffers: Vec<ResourceId> = (0..desc.buffer_count)
            .map(|_| ResourceId::from_raw(resources.alloc_id()))
            .collect();
        resources.swap_chain = Some(Chain {
            extent: desc.extent,
            back_buffers: back_buffers.clone(),
            presented: 0,
        });
        Ok(back_buffers)
    }

    fn resize_swap_chain(&self, extent: Extent) -> Result<Vec<ResourceId>> {
        self.ensure_healthy()?;
        let mut resources = self.inner.resources.lock().unwrap();
        let Some(chain) = resources.swap_chain.as_ref() else {
            return Err(Error::SurfaceLost("no swap chain to resize".into()));
        };
        let count = chain.back_buffers.len();
        let presented = chain.presented;
        let back_buffers: Vec<ResourceId> = (0..count)
            .map(|_| ResourceId::from_raw(resources.alloc_id()))
            .collect();
        resources.swap_chain = Some(Chain {
            extent,
            back_buffers: back_buffers.clone(),
            presented,
        });
        Ok(back_buffers)
    }

    fn submit(&self, submission: Submission<'_>) -> Result<()> {
        self.ensure_healthy()?;
        debug_assert!(
            {
                let resources = self.inner.resources.lock().unwrap();
                submission
                    .uploads
                    .iter()
                    .all(|flush| resources.buffers.contains_key(&flush.buffer))
            },
            "upload flush references unknown buffer"
        );
        let job = Job {
            signal_fence: submission.signal_fence,
            command_count: submission.commands.len(),
        };
        let sender = self.sender.lock().unwrap();
        match sender.as_ref() {
            Some(sender) if sender.send(job).is_ok() => Ok(()),
            _ => Err(Error::DeviceLost("executor thread terminated".into())),
        }
    }

    fn present(&self, _sync_interval: u32) -> Result<()> {
        self.ensure_healthy()?;
        let mut resources = self.inner.resources.lock().unwrap();
        match resources.swap_chain.as_mut() {
            Some(chain) => {
                chain.presented += 1;
                Ok(())
            }
            None => Err(Error::SurfaceLost("no swap chain".into())),
        }
    }

    fn completed_fence(&self) -> u64 {
        *self.inner.fence.lock().unwrap()
    }

    fn wait_fence(&self, value: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut fence = self.inner.fence.lock().unwrap();
        while *fence < value {
            if let Some(reason) = self.inner.lost_reason() {
                return Err(Error::DeviceLost(reason));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::DeviceLost(format!(
                    "fence wait for value {value} timed out after {timeout:?}"
                )));
            }
            let (guard, _) = self
                .inner
                .fence_cvar
                .wait_timeout(fence, deadline - now)
                .unwrap();
            fence = guard;
        }
        Ok(())
    }
}

/// In-memory stand-in for a native window surface. Tests and headless hosts
/// control its dimensions directly.
pub struct VirtualSurface {
    extent: Mutex<Option<Extent>>,
}

impl VirtualSurface {
    pub fn new(extent: Extent) -> Arc<Self> {
        Arc::new(Self {
            extent: Mutex::new(Some(extent)),
        })
    }

    /// Simulate a window resize.
    pub fn set_extent(&self, extent: Extent) {
        *self.extent.lock().unwrap() = Some(extent);
    }

    /// Simulate the window being destroyed.
    pub fn destroy(&self) {
        *self.extent.lock().unwrap() = None;
    }
}

impl NativeSurface for VirtualSurface {
    fn extent(&self) -> Option<Extent> {
        *self.extent.lock().unwrap()
    }
}
