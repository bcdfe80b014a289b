//! A dataflow runtime for signal-processing graphs: Blocks connected by
//! typed, ordered streaming Ports, scheduled concurrently by a Topology.
//!
//! The [`Topology`] owns a set of [`Block`]s (driven by [`BlockActor`]s),
//! flattens the user-declared edges, negotiates buffer providers, and wires
//! up subscriptions. Data moves as reference-counted [`flow_slabs::BufferChunk`]
//! slices; out-of-band items (`Label`, `Message`, `Packet`) ride alongside.

mod actor;
mod block;
mod error;
mod label;
mod message;
mod port;
pub mod testing;
mod topology;
pub mod wire;

pub use actor::{ActorState, BlockActor, ControlMessage, WorkStats};
pub use block::{Block, CallTable};
pub use error::{BlockUid, FlowError};
pub use label::Label;
pub use message::{register_conversion, Message, Object, Packet};
pub use port::{InputPort, OutputPort};
pub use topology::{DumpMode, Flow, Topology};

pub use flow_actors::{BufferManager, BufferMode, ThreadPool, ThreadPoolArgs, YieldMode};
pub use flow_slabs::{BufferChunk, BufferConvertError, DType, ManagedBuffer, UnknownType};
