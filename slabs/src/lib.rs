//! Typed, reference-counted slab views: [`DType`], [`ManagedBuffer`] and
//! [`BufferChunk`] (§4.A, §4.C).

mod chunk;
mod convert;
mod dtype;
mod managed;

pub use chunk::{BufferChunk, BufferConvertError, ForkGuard};
pub use dtype::{DType, Kind, UnknownType};
pub use managed::{ManagedBuffer, ReleaseHook};
