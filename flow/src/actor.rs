//! `BlockActor`: the per-block concurrency unit (§4.H).

use crate::block::Block;
use crate::port::{InputPort, OutputPort};
use flow_actors::{Runnable, ThreadPool};
use flow_logging::events::{ScheduleEvent, WorkEvent};
use flow_logging::Logger;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// An actor's run state, serialized through its control mailbox (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Built but never committed into a running topology.
    Constructed,
    /// Committed but not currently driven by `work()`.
    Inactive,
    /// Driven by `work()` as the scheduler deems ports ready.
    Active,
    /// `work()` raised; quarantined until the topology deactivates it.
    Faulted,
    /// No longer schedulable; its Block has been released.
    Destroyed,
}

/// A message sent to an actor's control mailbox, applied in order before any
/// `work()` evaluation (§4.H step 1).
pub enum ControlMessage {
    /// Subscribes `input` (with its wake callback) to output port `output_index`.
    Subscribe { output_index: usize, input: InputPort, wake: Arc<dyn Fn() + Send + Sync> },
    /// Removes a subscription from output port `output_index`.
    Unsubscribe { output_index: usize, input: InputPort },
    /// Installs a freshly negotiated manager on output port `output_index`.
    SetOutputManager { output_index: usize, manager: Box<dyn flow_actors::BufferManager> },
    /// Transitions Inactive→Active, invoking the block's `activate()`.
    Activate,
    /// Transitions Active→Inactive, invoking the block's `deactivate()`.
    Deactivate,
    /// Binds (or rebinds) the thread pool driving this actor.
    SetThreadPool(Arc<ThreadPool>),
}

/// Per-actor counters surfaced by `queryJSONStats` (§4.I, §6).
#[derive(Debug, Clone, Default)]
pub struct WorkStats {
    /// Number of times `work()` has been invoked.
    pub num_work_calls: u64,
    /// Cumulative elements consumed per input port, by port index.
    pub input_totals: Vec<u64>,
    /// Cumulative elements produced per output port, by port index.
    pub output_totals: Vec<u64>,
}

/// The concurrency unit owning one [`Block`]'s port state and control mailbox.
pub struct BlockActor {
    uid: u64,
    block: Arc<dyn Block>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    state: RwLock<ActorState>,
    mailbox_tx: crossbeam_channel::Sender<ControlMessage>,
    mailbox_rx: crossbeam_channel::Receiver<ControlMessage>,
    thread_pool: Mutex<Option<Arc<ThreadPool>>>,
    num_work_calls: AtomicU64,
    fault: RwLock<Option<String>>,
    self_handle: Mutex<Option<Arc<dyn Runnable>>>,
    idle_streak: AtomicUsize,
    work_logger: Mutex<Option<Logger<WorkEvent>>>,
    schedule_logger: Mutex<Option<Logger<ScheduleEvent>>>,
}

impl BlockActor {
    /// Creates an actor for `block`, with one [`InputPort`]/[`OutputPort`]
    /// per declared dtype.
    pub fn new(uid: u64, block: Arc<dyn Block>) -> Arc<Self> {
        let inputs = block.input_dtypes().into_iter().map(InputPort::new).collect();
        let outputs = block
            .output_dtypes()
            .into_iter()
            .enumerate()
            .map(|(i, dtype)| {
                let manager = block
                    .output_buffer_manager(i, "")
                    .unwrap_or_else(|| Box::new(flow_actors::GenericPool::new(dtype, 4, 1024)));
                OutputPort::new(dtype, manager)
            })
            .collect();
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(BlockActor {
            uid,
            block,
            inputs,
            outputs,
            state: RwLock::new(ActorState::Constructed),
            mailbox_tx: tx,
            mailbox_rx: rx,
            thread_pool: Mutex::new(None),
            num_work_calls: AtomicU64::new(0),
            fault: RwLock::new(None),
            self_handle: Mutex::new(None),
            idle_streak: AtomicUsize::new(0),
            work_logger: Mutex::new(None),
            schedule_logger: Mutex::new(None),
        })
    }

    /// Stable identifier for this actor, stable for its Block's lifetime.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// The current run state.
    pub fn state(&self) -> ActorState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// This actor's input ports, in declaration order.
    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    /// This actor's output ports, in declaration order.
    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    /// The block's display name.
    pub fn block_name(&self) -> &str {
        self.block.name()
    }

    /// Installs typed loggers obtained from a [`flow_logging::Registry`].
    pub fn install_loggers(&self, work: Option<Logger<WorkEvent>>, schedule: Option<Logger<ScheduleEvent>>) {
        *self.work_logger.lock().unwrap_or_else(|e| e.into_inner()) = work;
        *self.schedule_logger.lock().unwrap_or_else(|e| e.into_inner()) = schedule;
    }

    /// Sets this actor's own `Runnable` handle, used to re-submit itself to
    /// the thread pool after its mailbox receives new control messages.
    pub fn bind_self(self: &Arc<Self>) {
        *self.self_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(self.clone() as Arc<dyn Runnable>);
    }

    /// A wake callback other actors can hold to re-submit this actor to its
    /// thread pool, used as the `wake` argument to [`OutputPort::subscribe`].
    pub fn waker(self: &Arc<Self>) -> Arc<dyn Fn() + Send + Sync> {
        let this = self.clone();
        Arc::new(move || this.resubmit())
    }

    fn resubmit(&self) {
        let pool = self.thread_pool.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let handle = self.self_handle.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let (Some(pool), Some(handle)) = (pool, handle) {
            pool.submit(handle);
        }
    }

    /// Enqueues a control message; mailbox order is preserved.
    pub fn send(&self, message: ControlMessage) {
        let _ = self.mailbox_tx.send(message);
    }

    fn drain_mailbox(&self) {
        while let Ok(message) = self.mailbox_rx.try_recv() {
            match message {
                ControlMessage::Subscribe { output_index, input, wake } => {
                    if let Some(output) = self.outputs.get(output_index) {
                        output.subscribe(input, wake);
                    }
                }
                ControlMessage::Unsubscribe { output_index, input } => {
                    if let Some(output) = self.outputs.get(output_index) {
                        output.unsubscribe(&input);
                    }
                }
                ControlMessage::SetOutputManager { output_index, manager } => {
                    if let Some(output) = self.outputs.get(output_index) {
                        output.set_manager(manager);
                    }
                }
                ControlMessage::Activate => self.transition_active(),
                ControlMessage::Deactivate => self.transition_inactive(),
                ControlMessage::SetThreadPool(pool) => {
                    *self.thread_pool.lock().unwrap_or_else(|e| e.into_inner()) = Some(pool);
                }
            }
        }
    }

    fn log_schedule(&self, state: &'static str) {
        if let Some(logger) = self.schedule_logger.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            logger.log(ScheduleEvent { actor_uid: self.uid, state });
        }
    }

    fn transition_active(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state == ActorState::Inactive || *state == ActorState::Constructed {
            self.block.activate();
            *state = ActorState::Active;
            drop(state);
            self.log_schedule("Active");
            // Ports may already be ready (e.g. a source with no inputs), and
            // no upstream wake callback will ever fire for this actor, so
            // give it its first turn on the pool explicitly.
            self.resubmit();
        }
    }

    fn transition_inactive(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state == ActorState::Active || *state == ActorState::Faulted {
            self.block.deactivate();
            *state = ActorState::Inactive;
            drop(state);
            self.log_schedule("Inactive");
        }
    }

    /// Snapshot of this actor's work/port statistics for `queryJSONStats`.
    pub fn stats(&self) -> WorkStats {
        WorkStats {
            num_work_calls: self.num_work_calls.load(Ordering::SeqCst),
            input_totals: self.inputs.iter().map(|i| i.total_elements()).collect(),
            output_totals: self.outputs.iter().map(|o| o.total_elements()).collect(),
        }
    }

    /// Last recorded fault message, if this actor is in the Faulted sub-state.
    pub fn fault(&self) -> Option<String> {
        self.fault.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn ports_ready(&self) -> bool {
        let inputs_ready = self.inputs.iter().all(|i| i.is_ready());
        let outputs_ready = self.outputs.is_empty() || self.outputs.iter().any(|o| o.is_ready());
        inputs_ready && outputs_ready
    }

    fn run_work(&self) {
        let produced_before: Vec<u64> = self.outputs.iter().map(|o| o.total_elements()).collect();
        let consumed_before: Vec<u64> = self.inputs.iter().map(|i| i.total_elements()).collect();

        let block = &self.block;
        let inputs = &self.inputs;
        let outputs = &self.outputs;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            block.work(inputs, outputs);
        }));

        if let Err(payload) = result {
            let reason = panic_payload_message(&payload);
            *self.fault.write().unwrap_or_else(|e| e.into_inner()) = Some(reason);
            *self.state.write().unwrap_or_else(|e| e.into_inner()) = ActorState::Faulted;
            self.log_schedule("Faulted");
            return;
        }

        for (i, input) in self.inputs.iter().enumerate() {
            self.block.propagate_labels(i, input, &self.outputs);
        }
        for (output, start) in self.outputs.iter().zip(produced_before.iter()) {
            output.flush_pending(*start);
        }

        self.num_work_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(logger) = self.work_logger.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let consumed: Vec<u64> =
                self.inputs.iter().zip(consumed_before.iter()).map(|(i, before)| i.total_elements() - before).collect();
            let produced: Vec<u64> = self
                .outputs
                .iter()
                .zip(produced_before.iter())
                .map(|(o, before)| o.total_elements() - before)
                .collect();
            logger.log(WorkEvent { actor_uid: self.uid, consumed, produced });
        }
    }
}

/// Extracts a display message from a `catch_unwind` payload, matching the
/// two payload shapes `panic!`/`assert!` actually produce.
fn panic_payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "block panicked with a non-string payload".to_string()
    }
}

impl Runnable for BlockActor {
    fn step(&self) -> bool {
        self.drain_mailbox();

        if self.state() != ActorState::Active {
            return false;
        }

        if !self.ports_ready() {
            let streak = self.idle_streak.fetch_add(1, Ordering::SeqCst);
            return streak < 1;
        }
        self.idle_streak.store(0, Ordering::SeqCst);
        self.run_work();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use flow_slabs::DType;

    struct PassThrough;
    impl Block for PassThrough {
        fn name(&self) -> &str {
            "pass_through"
        }
        fn input_dtypes(&self) -> Vec<DType> {
            vec![DType::from_alias("uint8", 1).unwrap()]
        }
        fn output_dtypes(&self) -> Vec<DType> {
            vec![DType::from_alias("uint8", 1).unwrap()]
        }
        fn work(&self, inputs: &[InputPort], outputs: &[OutputPort]) {
            let n = inputs[0].elements().min(outputs[0].elements());
            if n == 0 {
                return;
            }
            let src = inputs[0].buffer().unwrap();
            let dst = outputs[0].buffer().unwrap();
            src.with_bytes(|s| dst.with_bytes_mut(|d| d[..n].copy_from_slice(&s[..n])));
            inputs[0].consume(n);
            outputs[0].produce(n);
        }
    }

    #[test]
    fn actor_starts_constructed_and_ignores_work_until_active() {
        let actor = BlockActor::new(1, Arc::new(PassThrough));
        assert_eq!(actor.state(), ActorState::Constructed);
        assert!(!actor.step());
    }

    #[test]
    fn actor_runs_work_once_active_and_ready() {
        let actor = BlockActor::new(1, Arc::new(PassThrough));
        actor.send(ControlMessage::Activate);
        let chunk = flow_slabs::BufferChunk::alloc(DType::from_alias("uint8", 1).unwrap(), 4);
        chunk.with_bytes_mut(|b| b.copy_from_slice(&[9, 9, 9, 9]));
        actor.inputs()[0].deliver_chunk(chunk);
        assert!(actor.step());
        assert_eq!(actor.stats().num_work_calls, 1);
    }

    #[test]
    fn faulted_state_blocks_further_message_delivery() {
        let actor = BlockActor::new(1, Arc::new(PassThrough));
        actor.send(ControlMessage::Activate);
        actor.step();
        *actor.fault.write().unwrap() = Some("boom".to_string());
        *actor.state.write().unwrap() = ActorState::Faulted;
        assert!(!actor.step());
        assert_eq!(actor.fault(), Some("boom".to_string()));
        let _ = Message::Unit;
    }

    struct PanicsOnWork;
    impl Block for PanicsOnWork {
        fn name(&self) -> &str {
            "panics_on_work"
        }
        fn input_dtypes(&self) -> Vec<DType> {
            vec![DType::from_alias("uint8", 1).unwrap()]
        }
        fn output_dtypes(&self) -> Vec<DType> {
            vec![]
        }
        fn work(&self, inputs: &[InputPort], _outputs: &[OutputPort]) {
            let n = inputs[0].elements();
            if n != 0 {
                panic!("block exploded");
            }
        }
    }

    #[test]
    fn a_panic_out_of_work_quarantines_the_actor_as_faulted() {
        let actor = BlockActor::new(1, Arc::new(PanicsOnWork));
        actor.send(ControlMessage::Activate);
        let chunk = flow_slabs::BufferChunk::alloc(DType::from_alias("uint8", 1).unwrap(), 4);
        actor.inputs()[0].deliver_chunk(chunk);

        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let stepped = actor.step();
        std::panic::set_hook(prev_hook);

        assert!(stepped, "step() itself must not unwind past catch_unwind");
        assert_eq!(actor.state(), ActorState::Faulted);
        assert_eq!(actor.fault().as_deref(), Some("block exploded"));
        assert!(!actor.step(), "a faulted actor is no longer schedulable");
    }
}
