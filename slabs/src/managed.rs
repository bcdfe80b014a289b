//! `ManagedBuffer`: a [`SharedBuffer`] bound to a pool slot (§4.C).

use flow_buffers::SharedBuffer;
use std::sync::Arc;

/// A hook invoked exactly once, when the last reference to a pool slot is
/// dropped, so the slot can be returned to its pool.
pub type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

struct Inner {
    buffer: SharedBuffer,
    /// Opaque slot identifier, stable for the slab's lifetime, used by the
    /// owning pool to find the slot being released.
    slot: usize,
    release: Option<ReleaseHook>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

/// A [`SharedBuffer`] checked out from a pool.
///
/// There is exactly one `ManagedBuffer` per pool slot at any time (§3); all
/// sharing happens through cloning this handle, whose `Arc` refcount *is*
/// the slot's liveness signal. The pool reclaims the slot the instant the
/// last clone drops.
#[derive(Clone)]
pub struct ManagedBuffer {
    inner: Arc<Inner>,
}

impl ManagedBuffer {
    /// Binds `buffer` to pool slot `slot`, to be returned via `release` when
    /// the last clone of the resulting handle is dropped.
    pub fn new(buffer: SharedBuffer, slot: usize, release: ReleaseHook) -> Self {
        ManagedBuffer {
            inner: Arc::new(Inner { buffer, slot, release: Some(release) }),
        }
    }

    /// Constructs a `ManagedBuffer` with no pool behind it (an independent
    /// heap allocation, per §4.C's "independent allocation" case for
    /// `BufferChunk`). Dropping the last handle simply frees the memory.
    pub fn standalone(buffer: SharedBuffer) -> Self {
        ManagedBuffer {
            inner: Arc::new(Inner { buffer, slot: usize::MAX, release: None }),
        }
    }

    /// The underlying memory region.
    pub fn buffer(&self) -> &SharedBuffer {
        &self.inner.buffer
    }

    /// The pool slot this buffer occupies, or `usize::MAX` for a standalone
    /// (unpooled) buffer.
    pub fn slot(&self) -> usize {
        self.inner.slot
    }

    /// Whether this is the only outstanding handle to the slot.
    pub fn unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Number of outstanding handles to the slot.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Identity of the backing slot, stable across clones, usable as a map
    /// key by buffer managers tracking in-flight slabs.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn release_hook_fires_once_last_clone_drops() {
        let released = Arc::new(AtomicBool::new(false));
        let released2 = released.clone();
        let mb = ManagedBuffer::new(SharedBuffer::alloc(16), 3, Box::new(move || {
            released2.store(true, Ordering::SeqCst);
        }));
        let clone = mb.clone();
        assert!(!mb.unique());
        drop(mb);
        assert!(!released.load(Ordering::SeqCst));
        drop(clone);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn standalone_has_no_release_hook() {
        let mb = ManagedBuffer::standalone(SharedBuffer::alloc(8));
        assert_eq!(mb.slot(), usize::MAX);
        assert!(mb.unique());
    }
}
