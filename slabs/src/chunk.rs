//! `BufferChunk`: a typed, possibly sub-range view over a [`ManagedBuffer`] (§4.C).

use crate::convert::{convert_elements, split_complex};
use crate::dtype::DType;
use crate::managed::ManagedBuffer;
use flow_buffers::SharedBuffer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Error raised by [`BufferChunk::convert`] / [`BufferChunk::convert_complex`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferConvertError {
    /// The destination chunk is too small to hold the converted elements.
    #[error("conversion needs {needed} bytes but destination only has {available}")]
    DestinationTooSmall {
        /// Bytes the conversion would write.
        needed: usize,
        /// Bytes actually available in the destination.
        available: usize,
    },
    /// `convert_complex` was called on a non-complex source chunk.
    #[error("convert_complex requires a complex source dtype, got {0}")]
    NotComplex(String),
    /// More elements were requested than the source chunk actually holds.
    #[error("conversion of {needed} elements needs a source of at least that many, got {available}")]
    SourceTooSmall {
        /// Elements the conversion was asked to read.
        needed: usize,
        /// Elements actually available in the source.
        available: usize,
    },
}

/// A typed view into a [`ManagedBuffer`]: an address, a byte length, a
/// [`DType`], and a counter of chunks forked from this one that still
/// depend on its window remaining valid (e.g. a circular buffer's
/// outstanding partial reads).
#[derive(Clone)]
pub struct BufferChunk {
    buffer: SharedBuffer,
    managed: ManagedBuffer,
    dtype: DType,
    next_buffers: Arc<AtomicUsize>,
}

impl BufferChunk {
    /// Wraps the whole of `managed`'s buffer, typed as `dtype`.
    pub fn new(managed: ManagedBuffer, dtype: DType) -> Self {
        let buffer = managed.buffer().clone();
        BufferChunk { buffer, managed, dtype, next_buffers: Arc::new(AtomicUsize::new(0)) }
    }

    /// Wraps an independent heap allocation of `n_elements` elements of `dtype`,
    /// with no backing pool (§4.C's "independent allocation" case).
    pub fn alloc(dtype: DType, n_elements: usize) -> Self {
        let buffer = SharedBuffer::alloc(dtype.size() * n_elements);
        let managed = ManagedBuffer::standalone(buffer.clone());
        BufferChunk { buffer, managed, dtype, next_buffers: Arc::new(AtomicUsize::new(0)) }
    }

    /// A sub-range of `self`, covering `[start_element, start_element + n_elements)`.
    pub fn slice(&self, start_element: usize, n_elements: usize) -> Result<Self, flow_buffers::SharedBufferError> {
        let stride = self.dtype.size();
        let sub = self.buffer.subrange(start_element * stride, n_elements * stride)?;
        Ok(BufferChunk {
            buffer: sub,
            managed: self.managed.clone(),
            dtype: self.dtype,
            next_buffers: self.next_buffers.clone(),
        })
    }

    /// The chunk's element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Absolute address of this chunk's first byte, in the coordinate space
    /// of its backing container.
    pub fn address(&self) -> usize {
        self.buffer.address()
    }

    /// Length of this chunk, in bytes.
    pub fn length_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Number of whole elements this chunk holds.
    pub fn n_elements(&self) -> usize {
        self.buffer.len() / self.dtype.size()
    }

    /// The backing pool slot.
    pub fn managed_buffer(&self) -> &ManagedBuffer {
        &self.managed
    }

    /// Number of chunks forked from this one (via [`Self::fork`]) that have
    /// not yet been dropped.
    pub fn next_buffers(&self) -> usize {
        self.next_buffers.load(Ordering::SeqCst)
    }

    /// Marks a dependent chunk derived from this one's window (e.g. a
    /// residual tail left after a partial consume). The owning pool must not
    /// reclaim this chunk's slot while `next_buffers() > 0`.
    pub fn fork(&self) -> ForkGuard {
        self.next_buffers.fetch_add(1, Ordering::SeqCst);
        ForkGuard { counter: self.next_buffers.clone() }
    }

    /// Runs `f` with read access to this chunk's raw bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.buffer.with_bytes(f)
    }

    /// Runs `f` with mutable access to this chunk's raw bytes.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.buffer.with_bytes_mut(f)
    }

    /// Appends `other` to `self`.
    ///
    /// If `self` is empty, the result is simply `other` (a reference copy:
    /// same address, length and backing slot — no allocation). Otherwise a
    /// fresh heap slab sized to hold both is allocated and both contents are
    /// copied into it.
    pub fn append(&self, other: &BufferChunk) -> BufferChunk {
        assert_eq!(self.dtype, other.dtype, "append requires matching dtypes");
        if self.length_bytes() == 0 {
            return other.clone();
        }
        if other.length_bytes() == 0 {
            return self.clone();
        }
        let total = self.length_bytes() + other.length_bytes();
        let combined = SharedBuffer::alloc(total);
        combined.with_bytes_mut(|dst| {
            self.with_bytes(|a| dst[..a.len()].copy_from_slice(a));
            other.with_bytes(|b| dst[self.length_bytes()..].copy_from_slice(b));
        });
        BufferChunk {
            managed: ManagedBuffer::standalone(combined.clone()),
            buffer: combined,
            dtype: self.dtype,
            next_buffers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Converts this chunk's elements to `target_dtype`, writing into a
    /// freshly allocated chunk. `n_elements` defaults to this chunk's full
    /// element count when `None`.
    pub fn convert(&self, target_dtype: DType, n_elements: Option<usize>) -> Result<BufferChunk, BufferConvertError> {
        let n = n_elements.unwrap_or_else(|| self.n_elements());
        if n > self.n_elements() {
            return Err(BufferConvertError::SourceTooSmall { needed: n, available: self.n_elements() });
        }
        let needed = target_dtype.size() * n;
        let out = BufferChunk::alloc(target_dtype, n);
        self.with_bytes(|src| {
            out.with_bytes_mut(|dst| {
                if dst.len() < needed {
                    return Err(BufferConvertError::DestinationTooSmall { needed, available: dst.len() });
                }
                convert_elements(src, &self.dtype, dst, &target_dtype, n);
                Ok(())
            })
        })?;
        Ok(out)
    }

    /// Splits a complex chunk into separate real and imaginary chunks, each
    /// of the underlying (real) scalar type.
    pub fn convert_complex(&self) -> Result<(BufferChunk, BufferChunk), BufferConvertError> {
        if !self.dtype.is_complex() {
            return Err(BufferConvertError::NotComplex(self.dtype.to_canonical()));
        }
        let real_dtype = DType::from_alias(&scalar_alias(&self.dtype), self.dtype.dimension())
            .expect("complex dtype's scalar alias is always known");
        let n = self.n_elements();
        let real = BufferChunk::alloc(real_dtype, n);
        let imag = BufferChunk::alloc(real_dtype, n);
        self.with_bytes(|src| {
            real.with_bytes_mut(|r| imag.with_bytes_mut(|i| split_complex(src, &self.dtype, n, r, i)));
        });
        Ok((real, imag))
    }
}

/// Strips the `complex_` prefix to find the matching real scalar alias.
fn scalar_alias(dtype: &DType) -> String {
    dtype.to_canonical().trim_start_matches("complex_").to_string()
}

/// Decrements a [`BufferChunk`]'s `next_buffers` counter when dropped.
pub struct ForkGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ForkGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_empty_is_reference_copy() {
        let empty = BufferChunk::alloc(DType::from_alias("uint8", 1).unwrap(), 0);
        let data = BufferChunk::alloc(DType::from_alias("uint8", 1).unwrap(), 4);
        data.with_bytes_mut(|b| b.copy_from_slice(&[1, 2, 3, 4]));
        let result = empty.append(&data);
        assert_eq!(result.address(), data.address());
        assert_eq!(result.managed_buffer().identity(), data.managed_buffer().identity());
    }

    #[test]
    fn append_to_nonempty_allocates_and_copies_both() {
        let a = BufferChunk::alloc(DType::from_alias("uint8", 1).unwrap(), 2);
        a.with_bytes_mut(|b| b.copy_from_slice(&[1, 2]));
        let b = BufferChunk::alloc(DType::from_alias("uint8", 1).unwrap(), 2);
        b.with_bytes_mut(|b| b.copy_from_slice(&[3, 4]));
        let result = a.append(&b);
        assert_ne!(result.managed_buffer().identity(), a.managed_buffer().identity());
        assert_eq!(result.with_bytes(|b| b.to_vec()), vec![1, 2, 3, 4]);
    }

    #[test]
    fn convert_widens_int_to_float() {
        let src = BufferChunk::alloc(DType::from_alias("int32", 1).unwrap(), 2);
        src.with_bytes_mut(|b| {
            b[0..4].copy_from_slice(&10i32.to_le_bytes());
            b[4..8].copy_from_slice(&20i32.to_le_bytes());
        });
        let dst = src.convert(DType::from_alias("float32", 1).unwrap(), None).unwrap();
        dst.with_bytes(|b| {
            assert_eq!(f32::from_le_bytes(b[0..4].try_into().unwrap()), 10.0);
            assert_eq!(f32::from_le_bytes(b[4..8].try_into().unwrap()), 20.0);
        });
    }

    #[test]
    fn convert_requesting_more_elements_than_the_source_holds_fails_cleanly() {
        let src = BufferChunk::alloc(DType::from_alias("int32", 1).unwrap(), 2);
        let err = src.convert(DType::from_alias("float32", 1).unwrap(), Some(5)).unwrap_err();
        assert_eq!(err, BufferConvertError::SourceTooSmall { needed: 5, available: 2 });
    }

    #[test]
    fn convert_complex_splits_lanes() {
        let c = BufferChunk::alloc(DType::from_alias("complex_float32", 1).unwrap(), 1);
        c.with_bytes_mut(|b| {
            b[0..4].copy_from_slice(&1.0f32.to_le_bytes());
            b[4..8].copy_from_slice(&2.0f32.to_le_bytes());
        });
        let (real, imag) = c.convert_complex().unwrap();
        assert_eq!(real.with_bytes(|b| f32::from_le_bytes(b.try_into().unwrap())), 1.0);
        assert_eq!(imag.with_bytes(|b| f32::from_le_bytes(b.try_into().unwrap())), 2.0);
    }

    #[test]
    fn convert_complex_on_real_fails() {
        let f = BufferChunk::alloc(DType::from_alias("float32", 1).unwrap(), 1);
        assert!(matches!(f.convert_complex(), Err(BufferConvertError::NotComplex(_))));
    }

    #[test]
    fn fork_guard_tracks_outstanding_dependents() {
        let chunk = BufferChunk::alloc(DType::from_alias("uint8", 1).unwrap(), 8);
        assert_eq!(chunk.next_buffers(), 0);
        let guard = chunk.fork();
        assert_eq!(chunk.next_buffers(), 1);
        drop(guard);
        assert_eq!(chunk.next_buffers(), 0);
    }
}
