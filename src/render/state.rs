//! GPU resource usage states and transition tracking

use std::collections::HashMap;
use std::fmt;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::device::ResourceId;

/// Usage state of a GPU resource.
///
/// A resource must be in the right state before a command may access it;
/// changing state requires a recorded transition barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Presentable / idle. Back-buffers start and end every frame here.
    Present,
    /// Bound as a color render target.
    RenderTarget,
    /// Destination of a copy operation.
    CopyDest,
    /// Readable from shaders (sampled or buffer reads).
    ShaderResource,
    /// CPU-mapped upload memory readable by the GPU. Upload heaps are created
    /// in this state and never leave it.
    GenericRead,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceState::Present => "present",
            ResourceState::RenderTarget => "render-target",
            ResourceState::CopyDest => "copy-dest",
            ResourceState::ShaderResource => "shader-resource",
            ResourceState::GenericRead => "generic-read",
        };
        f.write_str(name)
    }
}

/// Tracks the recorded state of every resource touched during one frame.
///
/// Transitions for a resource must form a single linear path: each recorded
/// transition's `from` state must equal the state the tracker last saw.
/// Resources never registered are assumed [`ResourceState::Present`].
#[derive(Debug, Default)]
pub struct StateTracker {
    states: HashMap<ResourceId, ResourceState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all tracked states (start of a new frame's recording).
    pub fn reset(&mut self) {
        self.states.clear();
    }

    /// Record the known state of a resource without a barrier (creation
    /// state, or the implicit present state at frame start).
    pub fn register(&mut self, resource: ResourceId, state: ResourceState) {
        self.states.insert(resource, state);
    }

    /// State the tracker last saw for `resource`.
    pub fn current(&self, resource: ResourceId) -> ResourceState {
        self.states
            .get(&resource)
            .copied()
            .unwrap_or(ResourceState::Present)
    }

    /// Validate and record a transition barrier.
    ///
    /// Fails with [`Error::InvalidResourceState`] if `from` does not match the
    /// tracked state — a skipped intermediate state is a programming error.
    pub fn transition(
        &mut self,
        resource: ResourceId,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<()> {
        let actual = self.current(resource);
        if actual != from {
            return Err(Error::InvalidResourceState {
                resource,
                expected: from,
                actual,
            });
        }
        self.states.insert(resource, to);
        Ok(())
    }

    /// Require `resource` to be in `expected` state for an access.
    pub fn expect(&self, resource: ResourceId, expected: ResourceState) -> Result<()> {
        let actual = self.current(resource);
        if actual != expected {
            return Err(Error::InvalidResourceState {
                resource,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ResourceId {
        ResourceId::from_raw(raw)
    }

    #[test]
    fn test_linear_transition_path() {
        let mut tracker = StateTracker::new();
        tracker.register(id(1), ResourceState::Present);

        tracker
            .transition(id(1), ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        tracker
            .transition(id(1), ResourceState::RenderTarget, ResourceState::Present)
            .unwrap();
        assert_eq!(tracker.current(id(1)), ResourceState::Present);
    }

    #[test]
    fn test_skipped_transition_rejected() {
        let mut tracker = StateTracker::new();
        tracker.register(id(1), ResourceState::Present);

        // Claims the resource is already a render target; it is not.
        let err = tracker
            .transition(id(1), ResourceState::RenderTarget, ResourceState::Present)
            .unwrap_err();
        match err {
            Error::InvalidResourceState {
                expected, actual, ..
            } => {
                assert_eq!(expected, ResourceState::RenderTarget);
                assert_eq!(actual, ResourceState::Present);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_expect_wrong_state() {
        let mut tracker = StateTracker::new();
        tracker.register(id(2), ResourceState::GenericRead);

        assert!(tracker.expect(id(2), ResourceState::GenericRead).is_ok());
        assert!(tracker.expect(id(2), ResourceState::RenderTarget).is_err());
    }

    #[test]
    fn test_unregistered_defaults_to_present() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.current(id(9)), ResourceState::Present);
    }

    #[test]
    fn test_reset_forgets_states() {
        let mut tracker = StateTracker::new();
        tracker.register(id(1), ResourceState::RenderTarget);
        tracker.reset();
        assert_eq!(tracker.current(id(1)), ResourceState::Present);
    }
}
