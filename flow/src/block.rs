//! `Block`: the user-extensible computational unit (§4.G).

use crate::error::FlowError;
use crate::message::Object;
use crate::port::{InputPort, OutputPort};
use flow_actors::{BufferManager, BufferMode};
use flow_slabs::DType;
use std::collections::HashMap;

/// A string-keyed table of typed function pointers, invocable opaquely with
/// arguments and return value marshalled through [`Object`].
#[derive(Default)]
pub struct CallTable {
    calls: HashMap<String, Box<dyn Fn(&[Object]) -> Result<Object, FlowError> + Send + Sync>>,
}

impl CallTable {
    /// An empty call table.
    pub fn new() -> Self {
        CallTable::default()
    }

    /// Registers `name` to invoke `f`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Object]) -> Result<Object, FlowError> + Send + Sync + 'static,
    ) {
        self.calls.insert(name.into(), Box::new(f));
    }

    /// Invokes the call bound to `name`.
    pub fn invoke(&self, name: &str, args: &[Object]) -> Result<Object, FlowError> {
        match self.calls.get(name) {
            Some(f) => f(args),
            None => Err(FlowError::InvalidArgument(format!("no registered call named {name:?}"))),
        }
    }

    /// Names of every registered call.
    pub fn names(&self) -> Vec<&str> {
        self.calls.keys().map(String::as_str).collect()
    }
}

/// The computational unit a [`crate::actor::BlockActor`] drives.
///
/// Ports are not owned by the block itself (the actor owns port state so it
/// can mediate concurrent access); a block implementation instead declares
/// its port *types* and operates on the [`InputPort`]/[`OutputPort`] handles
/// the actor hands it at `work()` time.
pub trait Block: Send + Sync {
    /// A display name, used in topology dumps and stats.
    fn name(&self) -> &str;

    /// Declared input port element types, in port order.
    fn input_dtypes(&self) -> Vec<DType>;

    /// Declared output port element types, in port order.
    fn output_dtypes(&self) -> Vec<DType>;

    /// Invoked when the actor deems inputs and outputs ready. Reads
    /// `inputs[i].buffer()`, writes `outputs[i].buffer()`, and calls
    /// `consume()`/`produce()` plus any label/message posting.
    fn work(&self, inputs: &[InputPort], outputs: &[OutputPort]);

    /// Called on the Inactive→Active transition, before any `work()` call.
    /// Resetting internal DSP state belongs here.
    fn activate(&self) {}

    /// Called on the Active→Inactive transition, after the last `work()` call.
    fn deactivate(&self) {}

    /// The `(l, m)` interpolation/decimation ratio relating this block's
    /// output element rate to `input_index`'s input rate; `(1, 1)` (no
    /// resampling) unless overridden.
    fn resample_ratio(&self, _input_index: usize) -> (u64, u64) {
        (1, 1)
    }

    /// Forwards pending labels on `input` to every output, scaling indices
    /// by [`Self::resample_ratio`]. Blocks that handle label propagation
    /// manually (e.g. framers inserting synthetic labels) override this to
    /// a no-op.
    fn propagate_labels(&self, input_index: usize, input: &InputPort, outputs: &[OutputPort]) {
        let (l, m) = self.resample_ratio(input_index);
        for label in input.labels() {
            let resampled = label.resample(l, m);
            for output in outputs {
                output.post_label(resampled.clone());
            }
        }
    }

    /// Declares how input port `port` wants its upstream buffers provided
    /// for cross-domain edges into `domain`.
    fn input_buffer_mode(&self, _port: usize, _domain: &str) -> BufferMode {
        BufferMode::Abdicate
    }

    /// Declares how output port `port` wants its buffers provided for
    /// cross-domain edges into `domain`.
    fn output_buffer_mode(&self, _port: usize, _domain: &str) -> BufferMode {
        BufferMode::Abdicate
    }

    /// Supplies a manager for input port `port` when [`Self::input_buffer_mode`]
    /// declares [`BufferMode::Custom`].
    fn input_buffer_manager(&self, _port: usize, _domain: &str) -> Option<Box<dyn BufferManager>> {
        None
    }

    /// Supplies a manager for output port `port` when [`Self::output_buffer_mode`]
    /// declares [`BufferMode::Custom`].
    fn output_buffer_manager(&self, _port: usize, _domain: &str) -> Option<Box<dyn BufferManager>> {
        None
    }

    /// The block's registered call table, if it exposes one. Signals and
    /// slots have no separate type: a signal is simply an output port whose
    /// payloads are exclusively `Message::Object` values, and a slot is a
    /// dedicated input port receiving the same.
    fn call_table(&self) -> Option<&CallTable> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_table_invokes_registered_function() {
        let mut table = CallTable::new();
        table.register("double", |args: &[Object]| {
            let n = args[0].downcast_ref::<i64>().copied().unwrap_or(0);
            Ok(Object::new("i64", n * 2))
        });
        let result = table.invoke("double", &[Object::new("i64", 21i64)]).unwrap();
        assert_eq!(result.downcast_ref::<i64>(), Some(&42));
    }

    #[test]
    fn unknown_call_is_invalid_argument() {
        let table = CallTable::new();
        assert!(matches!(table.invoke("nope", &[]), Err(FlowError::InvalidArgument(_))));
    }
}
