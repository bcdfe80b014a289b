//! Per-output buffer managers and provider negotiation (§4.D).

use crate::error::DomainError;
use flow_slabs::{BufferChunk, DType, ManagedBuffer};
use std::sync::{Arc, Mutex};

/// Whether a port supplies its own [`BufferManager`] or accepts whatever the
/// negotiation settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Accept whatever manager negotiation installs.
    Abdicate,
    /// Supply a domain-specific manager (e.g. DMA-backed memory).
    Custom,
}

/// Vends buffers for a block to write into, and reclaims them once every
/// subscriber has released its share.
///
/// Implementations are confined to a single output port and are never
/// shared across ports; the actor serializes all calls, so no internal
/// locking is required beyond what reclamation (via dropped [`ManagedBuffer`]
/// handles) needs.
pub trait BufferManager: Send {
    /// The next buffer the producer may write into, or `None` if there is
    /// currently no free capacity (the port is not ready).
    fn front(&mut self) -> Option<BufferChunk>;

    /// Advances the producer cursor by `length_elements` after a `front()`
    /// chunk has been written into; the chunk is now in flight to subscribers.
    fn produced(&mut self, chunk: BufferChunk, length_elements: usize);

    /// Signals that `length_elements` at the front of the consumer side have
    /// been fully released by every subscriber and may be reclaimed.
    fn pop(&mut self, length_elements: usize);

    /// Whether the manager currently holds zero readable elements.
    fn empty(&self) -> bool;
}

/// A pool of `num_slabs` equally-sized slabs, handed out round-robin; a slab
/// returns to the free set the instant its last referrer drops.
pub struct GenericPool {
    dtype: DType,
    slabs: Vec<flow_buffers::SharedBuffer>,
    free: Arc<Mutex<Vec<bool>>>,
    cursor: usize,
    slab_elements: usize,
}

impl GenericPool {
    /// Allocates `num_slabs` slabs, each holding `slab_elements` elements of `dtype`.
    pub fn new(dtype: DType, num_slabs: usize, slab_elements: usize) -> Self {
        let slabs = (0..num_slabs)
            .map(|_| flow_buffers::SharedBuffer::alloc(dtype.size() * slab_elements))
            .collect();
        GenericPool {
            dtype,
            slabs,
            free: Arc::new(Mutex::new(vec![true; num_slabs])),
            cursor: 0,
            slab_elements,
        }
    }
}

impl BufferManager for GenericPool {
    fn front(&mut self) -> Option<BufferChunk> {
        let n = self.slabs.len();
        for i in 0..n {
            let idx = (self.cursor + i) % n;
            let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
            if free[idx] {
                free[idx] = false;
                drop(free);
                self.cursor = (idx + 1) % n;
                let free_flags = self.free.clone();
                let managed = ManagedBuffer::new(
                    self.slabs[idx].clone(),
                    idx,
                    Box::new(move || {
                        free_flags.lock().unwrap_or_else(|e| e.into_inner())[idx] = true;
                    }),
                );
                return Some(BufferChunk::new(managed, self.dtype));
            }
        }
        None
    }

    fn produced(&mut self, _chunk: BufferChunk, _length_elements: usize) {
        // Reclamation is purely refcount-driven for a pool of fixed slabs;
        // nothing to track beyond the free-flag the release hook already sets.
    }

    fn pop(&mut self, _length_elements: usize) {
        // Consumer releases happen by dropping their `BufferChunk`, which
        // drives the same release hook; no separate bookkeeping needed.
    }

    fn empty(&self) -> bool {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).iter().all(|&f| !f)
    }
}

/// A single circular (mirrored-mapping) region, treated as an
/// infinite-looking ring: sub-range chunks may be addressed past the
/// logical end because the backing memory is mapped twice.
pub struct CircularManager {
    managed: ManagedBuffer,
    dtype: DType,
    capacity_elements: usize,
    write_cursor: u64,
    read_cursor: u64,
}

impl CircularManager {
    /// Allocates a circular region holding `capacity_elements` elements of `dtype`.
    pub fn new(dtype: DType, capacity_elements: usize) -> Result<Self, flow_buffers::SharedBufferError> {
        let buffer = flow_buffers::SharedBuffer::alloc_circular(dtype.size() * capacity_elements)?;
        Ok(CircularManager {
            managed: ManagedBuffer::standalone(buffer),
            dtype,
            capacity_elements,
            write_cursor: 0,
            read_cursor: 0,
        })
    }
}

impl BufferManager for CircularManager {
    fn front(&mut self) -> Option<BufferChunk> {
        let in_flight = (self.write_cursor - self.read_cursor) as usize;
        let available = self.capacity_elements.saturating_sub(in_flight);
        if available == 0 {
            return None;
        }
        let stride = self.dtype.size();
        let start = (self.write_cursor as usize % self.capacity_elements) * stride;
        let sub = self.managed.buffer().subrange(start, available * stride).ok()?;
        Some(BufferChunk::new(ManagedBuffer::standalone(sub), self.dtype))
    }

    fn produced(&mut self, _chunk: BufferChunk, length_elements: usize) {
        self.write_cursor += length_elements as u64;
    }

    fn pop(&mut self, length_elements: usize) {
        self.read_cursor += length_elements as u64;
    }

    fn empty(&self) -> bool {
        self.write_cursor == self.read_cursor
    }
}

/// Runs the §4.D provider-negotiation algorithm for one output edge fan-out.
///
/// `source` is the producing port's declared mode (with its supplied manager,
/// if `Custom`); `destinations` is each subscriber's declared mode (with its
/// supplied manager, if `Custom`). `generic` builds the fallback manager when
/// every party abdicates.
pub fn negotiate(
    domain: &str,
    source: (BufferMode, Option<Box<dyn BufferManager>>),
    destinations: Vec<(BufferMode, Option<Box<dyn BufferManager>>)>,
    generic: impl FnOnce() -> Box<dyn BufferManager>,
) -> Result<Box<dyn BufferManager>, DomainError> {
    let (source_mode, source_manager) = source;
    if source_mode == BufferMode::Custom {
        return Ok(source_manager.expect("CUSTOM source must supply a manager"));
    }

    let custom_destinations: Vec<_> = destinations
        .into_iter()
        .filter(|(mode, _)| *mode == BufferMode::Custom)
        .collect();

    match custom_destinations.len() {
        0 => Ok(generic()),
        1 => {
            let (_, manager) = custom_destinations.into_iter().next().unwrap();
            Ok(manager.expect("CUSTOM destination must supply a manager"))
        }
        _ => Err(DomainError { domain: domain.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_pool_round_robins_and_reclaims() {
        let mut pool = GenericPool::new(DType::from_alias("uint8", 1).unwrap(), 2, 16);
        let a = pool.front().unwrap();
        let b = pool.front().unwrap();
        assert!(pool.front().is_none());
        drop(a);
        assert!(pool.front().is_some());
        let _ = b;
    }

    #[test]
    fn negotiate_picks_generic_when_all_abdicate() {
        let result = negotiate(
            "d",
            (BufferMode::Abdicate, None),
            vec![(BufferMode::Abdicate, None), (BufferMode::Abdicate, None)],
            || Box::new(GenericPool::new(DType::from_alias("uint8", 1).unwrap(), 1, 8)),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn negotiate_fails_on_multiple_custom_destinations() {
        let dtype = DType::from_alias("uint8", 1).unwrap();
        let result = negotiate(
            "d",
            (BufferMode::Abdicate, None),
            vec![
                (BufferMode::Custom, Some(Box::new(GenericPool::new(dtype, 1, 8)) as Box<dyn BufferManager>)),
                (BufferMode::Custom, Some(Box::new(GenericPool::new(dtype, 1, 8)) as Box<dyn BufferManager>)),
            ],
            || Box::new(GenericPool::new(dtype, 1, 8)),
        );
        assert!(matches!(result, Err(DomainError { .. })));
    }

    #[test]
    fn circular_manager_front_reaches_into_the_mirror_without_panicking() {
        let dtype = DType::from_alias("uint8", 1).unwrap();
        let mut mgr = match CircularManager::new(dtype, 8192) {
            Ok(m) => m,
            Err(_) => return, // sandboxes that disallow memfd_create
        };
        let first = mgr.front().unwrap();
        assert_eq!(first.n_elements(), 8192);
        mgr.produced(first, 6000);
        mgr.pop(4000);

        // write_cursor=6000, read_cursor=4000: the next front() request
        // starts past the primary half and must read/write into the
        // mirrored region to reach its full `available` length.
        let chunk = mgr.front().expect("capacity remains after a partial drain");
        assert_eq!(chunk.n_elements(), 8192 - 2000);
        chunk.with_bytes_mut(|b| b.fill(0x42));
        chunk.with_bytes(|b| assert!(b.iter().all(|&x| x == 0x42)));
    }

    #[test]
    fn negotiate_prefers_source_custom() {
        let dtype = DType::from_alias("uint8", 1).unwrap();
        let result = negotiate(
            "d",
            (BufferMode::Custom, Some(Box::new(GenericPool::new(dtype, 1, 8)) as Box<dyn BufferManager>)),
            vec![(BufferMode::Abdicate, None)],
            || Box::new(GenericPool::new(dtype, 1, 8)),
        );
        assert!(result.is_ok());
    }
}
