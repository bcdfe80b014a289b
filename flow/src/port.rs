//! `InputPort` / `OutputPort`: per-block stream handles (§4.F).

use crate::label::Label;
use crate::message::Message;
use flow_actors::BufferManager;
use flow_slabs::{BufferChunk, DType};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

struct InputPortInner {
    dtype: DType,
    buffer: Option<BufferChunk>,
    consumed_cumulative: u64,
    produced_cumulative: u64,
    /// Labels not yet consumed past, keyed by absolute stream index.
    labels: VecDeque<Label>,
    messages: VecDeque<Message>,
    reserve: u64,
    /// Maximum unconsumed elements this input accepts before it signals
    /// back-pressure to its source (§5 "Back-pressure").
    capacity: u64,
}

/// A block's accumulated view of one input edge.
#[derive(Clone)]
pub struct InputPort {
    inner: Arc<Mutex<InputPortInner>>,
}

impl InputPort {
    /// Creates an empty input port for elements of `dtype`.
    pub fn new(dtype: DType) -> Self {
        InputPort {
            inner: Arc::new(Mutex::new(InputPortInner {
                dtype,
                buffer: None,
                consumed_cumulative: 0,
                produced_cumulative: 0,
                labels: VecDeque::new(),
                messages: VecDeque::new(),
                reserve: 0,
                capacity: u64::MAX,
            })),
        }
    }

    /// Sets the maximum unconsumed elements this input will accept; beyond
    /// this, [`Self::has_room`] reports false and the source's output
    /// becomes not-ready (back-pressure).
    pub fn set_capacity(&self, capacity: u64) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).capacity = capacity;
    }

    /// Whether this input can accept `n_elements` more without exceeding
    /// its capacity.
    pub fn has_room(&self, n_elements: usize) -> bool {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let current = guard.buffer.as_ref().map(|b| b.n_elements() as u64).unwrap_or(0);
        current + n_elements as u64 <= guard.capacity
    }

    /// The port's element type.
    pub fn dtype(&self) -> DType {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).dtype
    }

    /// The currently accumulated, unconsumed buffer.
    pub fn buffer(&self) -> Option<BufferChunk> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).buffer.clone()
    }

    /// Number of unconsumed elements currently accumulated.
    pub fn elements(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).buffer.as_ref().map(|b| b.n_elements()).unwrap_or(0)
    }

    /// Pending labels whose absolute index falls inside the current buffer,
    /// with indices rebased to offsets into that buffer.
    pub fn labels(&self) -> Vec<Label> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let consumed = guard.consumed_cumulative;
        let visible_end = consumed + guard.buffer.as_ref().map(|b| b.n_elements() as u64).unwrap_or(0);
        guard
            .labels
            .iter()
            .filter(|l| l.index >= consumed && l.index < visible_end)
            .map(|l| l.relative_to(consumed))
            .collect()
    }

    /// Whether a message is queued.
    pub fn has_message(&self) -> bool {
        !self.inner.lock().unwrap_or_else(|e| e.into_inner()).messages.is_empty()
    }

    /// Pops the oldest queued message, if any.
    pub fn pop_message(&self) -> Option<Message> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).messages.pop_front()
    }

    /// Consumes `n_elements` from the front of the accumulated buffer,
    /// dropping labels that fall entirely before the new consumed point.
    pub fn consume(&self, n_elements: usize) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.consumed_cumulative += n_elements as u64;
        let total = guard.buffer.as_ref().map(|b| b.n_elements()).unwrap_or(0);
        let remaining = total.saturating_sub(n_elements);
        guard.buffer = if remaining == 0 {
            None
        } else {
            guard.buffer.as_ref().and_then(|b| b.slice(n_elements, remaining).ok())
        };
        let cutoff = guard.consumed_cumulative;
        guard.labels.retain(|l| l.index >= cutoff);
    }

    /// Removes a specific pending label (by value equality).
    pub fn remove_label(&self, label: &Label) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).labels.retain(|l| l != label);
    }

    /// Cumulative elements ever delivered to this port.
    pub fn total_elements(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).produced_cumulative
    }

    /// Sets the minimum element count below which the actor will not call `work()`.
    pub fn set_reserve(&self, n: u64) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).reserve = n;
    }

    /// Whether this port currently has at least its reserve's worth of elements.
    pub fn is_ready(&self) -> bool {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.buffer.as_ref().map(|b| b.n_elements() as u64).unwrap_or(0) >= guard.reserve
    }

    /// Appends a chunk delivered from an upstream output port.
    pub fn deliver_chunk(&self, chunk: BufferChunk) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.produced_cumulative += chunk.n_elements() as u64;
        guard.buffer = Some(match guard.buffer.take() {
            Some(existing) => existing.append(&chunk),
            None => chunk,
        });
    }

    /// Records a label at an already-absolute index.
    pub fn deliver_label(&self, label: Label) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).labels.push_back(label);
    }

    /// Queues a message for this port.
    pub fn deliver_message(&self, message: Message) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).messages.push_back(message);
    }
}

/// A subscriber's input port plus a callback that re-submits its owning
/// actor to the thread pool when new data arrives for it.
#[derive(Clone)]
struct Subscription {
    input: InputPort,
    wake: Arc<dyn Fn() + Send + Sync>,
}

struct OutputPortInner {
    dtype: DType,
    manager: Box<dyn BufferManager>,
    current_front: Option<BufferChunk>,
    produced_cumulative: u64,
    subscribers: Vec<Subscription>,
    pending_labels: Vec<Label>,
    pending_messages: Vec<Message>,
}

/// A block's writable handle to one output edge, and its subscriber fan-out.
#[derive(Clone)]
pub struct OutputPort {
    inner: Arc<Mutex<OutputPortInner>>,
}

impl OutputPort {
    /// Creates an output port backed by `manager`.
    pub fn new(dtype: DType, manager: Box<dyn BufferManager>) -> Self {
        OutputPort {
            inner: Arc::new(Mutex::new(OutputPortInner {
                dtype,
                manager,
                current_front: None,
                produced_cumulative: 0,
                subscribers: Vec::new(),
                pending_labels: Vec::new(),
                pending_messages: Vec::new(),
            })),
        }
    }

    /// The port's element type.
    pub fn dtype(&self) -> DType {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).dtype
    }

    /// Replaces the installed manager, discarding any cached front buffer.
    /// Per §4.D, switching managers only happens at a commit boundary with
    /// the actor quiesced.
    pub fn set_manager(&self, manager: Box<dyn BufferManager>) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.manager = manager;
        guard.current_front = None;
    }

    /// The writable region from the installed manager, fetched and cached
    /// until the next `produce()`.
    pub fn buffer(&self) -> Option<BufferChunk> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.current_front.is_none() {
            guard.current_front = guard.manager.front();
        }
        guard.current_front.clone()
    }

    /// Capacity of the current writable region, or zero if none is available.
    pub fn elements(&self) -> usize {
        self.buffer().map(|b| b.n_elements()).unwrap_or(0)
    }

    /// Whether this output currently has writable capacity and every
    /// subscriber has room for it (§5 "Back-pressure": a subscriber with no
    /// free room makes the source output not ready).
    pub fn is_ready(&self) -> bool {
        let n = self.elements();
        if n == 0 {
            return false;
        }
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.subscribers.iter().all(|s| s.input.has_room(n))
    }

    /// Adds a subscriber to this output's fan-out list. `wake` is invoked
    /// after new data, labels, or messages are delivered to `input`, so the
    /// subscriber's owning actor can be re-evaluated.
    pub fn subscribe(&self, input: InputPort, wake: Arc<dyn Fn() + Send + Sync>) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).subscribers.push(Subscription { input, wake });
    }

    /// Removes a subscriber (by identity of its shared state).
    pub fn unsubscribe(&self, input: &InputPort) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.subscribers.retain(|s| !Arc::ptr_eq(&s.input.inner, &input.inner));
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).subscribers.len()
    }

    /// Advances the producer by `n_elements` of the cached front buffer and
    /// fans the produced prefix out to every subscriber.
    pub fn produce(&self, n_elements: usize) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(front) = guard.current_front.take() else { return };
        let produced = match front.slice(0, n_elements) {
            Ok(chunk) => chunk,
            Err(_) => front,
        };
        guard.manager.produced(produced.clone(), n_elements);
        guard.produced_cumulative += n_elements as u64;
        for sub in &guard.subscribers {
            sub.input.deliver_chunk(produced.clone());
            (sub.wake)();
        }
    }

    /// Bypasses the installed manager and forwards `chunk` to every
    /// subscriber directly, used for out-of-band or reference-forwarded data.
    pub fn post_buffer(&self, chunk: BufferChunk) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.produced_cumulative += chunk.n_elements() as u64;
        for sub in &guard.subscribers {
            sub.input.deliver_chunk(chunk.clone());
            (sub.wake)();
        }
    }

    /// Queues a label (index relative to elements produced so far in the
    /// current `work()` call) for absolute-index conversion and delivery
    /// once `work()` returns.
    pub fn post_label(&self, label: Label) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).pending_labels.push(label);
    }

    /// Queues a message for delivery once `work()` returns.
    pub fn post_message(&self, message: Message) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).pending_messages.push(message);
    }

    /// Cumulative elements ever produced on this port.
    pub fn total_elements(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).produced_cumulative
    }

    /// Drains labels/messages posted during the last `work()` call,
    /// converting label indices from call-relative to absolute using the
    /// cumulative count as of the start of that call, and delivers both to
    /// every subscriber. Called by the owning actor after `work()` returns.
    pub fn flush_pending(&self, produced_at_call_start: u64) {
        let (labels, messages, subscribers) = {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            (
                std::mem::take(&mut guard.pending_labels),
                std::mem::take(&mut guard.pending_messages),
                guard.subscribers.clone(),
            )
        };
        for label in labels {
            let absolute = Label { index: label.index + produced_at_call_start, ..label };
            for sub in &subscribers {
                sub.input.deliver_label(absolute.clone());
            }
        }
        for message in messages {
            for sub in &subscribers {
                sub.input.deliver_message(message.deep_clone());
            }
        }
    }
}
