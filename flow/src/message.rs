//! `Message`, `Packet`, and `Object`: out-of-band payloads carried alongside
//! the stream (§4.E), plus the typed any-value used by registered calls,
//! signals, and slots (§9 "Opaque typed values").

use crate::label::Label;
use flow_slabs::BufferChunk;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// A Packet whose payload is a typed [`Object`].
#[derive(Clone)]
pub struct Object {
    type_name: &'static str,
    type_id: TypeId,
    value: Arc<dyn Any + Send + Sync>,
}

impl Object {
    /// Wraps `value`, tagged with a human-readable `type_name`.
    pub fn new<T: Any + Send + Sync>(type_name: &'static str, value: T) -> Self {
        Object { type_name, type_id: TypeId::of::<T>(), value: Arc::new(value) }
    }

    /// The tag supplied at construction.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrows the wrapped value as `T`, if it was constructed with that type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Converts this value to `T` using a registered conversion, if one
    /// exists for `(Self's type, T)`. Returns a clone of `self` unchanged
    /// wrapped if `T` matches the current type exactly.
    pub fn convert<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        if let Some(direct) = self.value.downcast_ref::<T>() {
            return Some(direct.clone());
        }
        conversions().read().unwrap_or_else(|e| e.into_inner()).get(&(self.type_id, TypeId::of::<T>())).and_then(
            |f| f(self).downcast_ref::<T>().cloned(),
        )
    }
}

type ConversionFn = Box<dyn Fn(&Object) -> Object + Send + Sync>;

fn conversions() -> &'static RwLock<HashMap<(TypeId, TypeId), ConversionFn>> {
    static TABLE: OnceLock<RwLock<HashMap<(TypeId, TypeId), ConversionFn>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a conversion from `A` to `B`, used by [`Object::convert`].
/// Typically called once at process init for conversions such as
/// `int -> long` or `BufferChunk -> typed vector`.
pub fn register_conversion<A, B>(type_name: &'static str, f: impl Fn(&A) -> B + Send + Sync + 'static)
where
    A: Any + Send + Sync,
    B: Any + Send + Sync,
{
    let wrapped: ConversionFn = Box::new(move |obj: &Object| {
        let a = obj.downcast_ref::<A>().expect("conversion registered against the wrong source type");
        Object::new(type_name, f(a))
    });
    conversions().write().unwrap_or_else(|e| e.into_inner()).insert((TypeId::of::<A>(), TypeId::of::<B>()), wrapped);
}

/// A message whose payload is a [`BufferChunk`] plus the labels that fell
/// within its range when it was produced.
#[derive(Clone)]
pub struct Packet {
    /// The buffer payload.
    pub chunk: BufferChunk,
    /// Labels carried alongside the payload, with indices relative to the
    /// start of `chunk`.
    pub labels: Vec<Label>,
}

impl Packet {
    /// Constructs a packet from a chunk and its labels.
    pub fn new(chunk: BufferChunk, labels: Vec<Label>) -> Self {
        Packet { chunk, labels }
    }

    /// Copies this packet's payload into a fresh, independent allocation,
    /// so the sender's slab is not held captive by a downstream consumer
    /// across an input boundary.
    pub fn copy_for_forward(&self) -> Packet {
        let dtype = self.chunk.dtype();
        let n = self.chunk.n_elements();
        let copy = BufferChunk::alloc(dtype, n);
        self.chunk.with_bytes(|src| copy.with_bytes_mut(|dst| dst.copy_from_slice(src)));
        Packet { chunk: copy, labels: self.labels.clone() }
    }
}

/// An out-of-band item carried alongside the stream: arbitrary scalar
/// payloads, a bundled buffer ([`Packet`]), or an opaque typed [`Object`]
/// (used by registered calls, signals, and slots).
#[derive(Clone)]
pub enum Message {
    /// No payload.
    Unit,
    /// A boolean payload.
    Bool(bool),
    /// A signed integer payload.
    Int(i64),
    /// A floating point payload.
    Float(f64),
    /// A text payload.
    Text(String),
    /// A raw byte payload.
    Bytes(Vec<u8>),
    /// A buffer-bearing payload.
    Packet(Packet),
    /// An opaque typed value.
    Object(Object),
}

impl Message {
    /// Copies this message for delivery across an input boundary: a
    /// [`Message::Packet`] has its buffer payload copied (per §4.E); every
    /// other variant is a cheap clone.
    pub fn deep_clone(&self) -> Message {
        match self {
            Message::Packet(p) => Message::Packet(p.copy_for_forward()),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_roundtrips_through_downcast() {
        let obj = Object::new("i32", 42i32);
        assert_eq!(obj.downcast_ref::<i32>(), Some(&42));
        assert_eq!(obj.downcast_ref::<i64>(), None);
    }

    #[test]
    fn registered_conversion_runs() {
        register_conversion::<i32, i64>("i64", |v| *v as i64);
        let obj = Object::new("i32", 7i32);
        assert_eq!(obj.convert::<i64>(), Some(7i64));
    }

    #[test]
    fn packet_forward_copy_is_independent_allocation() {
        let chunk = BufferChunk::alloc(flow_slabs::DType::from_alias("uint8", 1).unwrap(), 4);
        chunk.with_bytes_mut(|b| b.copy_from_slice(&[1, 2, 3, 4]));
        let packet = Packet::new(chunk.clone(), vec![]);
        let forwarded = packet.copy_for_forward();
        assert_ne!(forwarded.chunk.managed_buffer().identity(), chunk.managed_buffer().identity());
        assert_eq!(forwarded.chunk.with_bytes(|b| b.to_vec()), vec![1, 2, 3, 4]);
    }
}
