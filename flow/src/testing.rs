//! Test-double blocks: data sources/sinks for scenario tests, plus the
//! network bridge pair `Topology::commit` inserts at domain boundaries
//! (§4.I "Domain bridges"). Not part of the public surface used by real
//! topologies; real socket transport is out of scope, so the bridge moves
//! wire-frame-encoded buffers over an in-process channel instead.

use crate::block::Block;
use crate::label::Label;
use crate::message::Message;
use crate::port::{InputPort, OutputPort};
use crate::wire::{self, Tag};
use flow_slabs::{BufferChunk, DType};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Emits a fixed byte payload across as many `work()` calls as it takes,
/// optionally posting a fixed set of labels and messages alongside the first
/// call that produces data (call-relative indices, so callers should size the
/// buffer to fit the whole payload in one call if exact label placement
/// matters, as the scenario tests here do).
pub struct FeederBlock {
    dtype: DType,
    data: Vec<u8>,
    labels: Vec<Label>,
    messages: Vec<Message>,
    cursor: AtomicUsize,
    posted_oob: AtomicBool,
}

impl FeederBlock {
    /// Feeds `data` (raw bytes, a whole number of `dtype`-sized elements),
    /// with no out-of-band labels or messages.
    pub fn new(dtype: DType, data: Vec<u8>) -> Self {
        FeederBlock::with_oob(dtype, data, Vec::new(), Vec::new())
    }

    /// Feeds `data`, plus `labels` and `messages` posted alongside the first
    /// batch that produces output.
    pub fn with_oob(dtype: DType, data: Vec<u8>, labels: Vec<Label>, messages: Vec<Message>) -> Self {
        FeederBlock { dtype, data, labels, messages, cursor: AtomicUsize::new(0), posted_oob: AtomicBool::new(false) }
    }
}

impl Block for FeederBlock {
    fn name(&self) -> &str {
        "feeder"
    }
    fn input_dtypes(&self) -> Vec<DType> {
        vec![]
    }
    fn output_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn work(&self, _inputs: &[InputPort], outputs: &[OutputPort]) {
        let stride = self.dtype.size().max(1);
        let pos = self.cursor.load(Ordering::SeqCst);
        if pos >= self.data.len() {
            return;
        }
        let Some(front) = outputs[0].buffer() else { return };
        let n = front.n_elements().min((self.data.len() - pos) / stride);
        if n == 0 {
            return;
        }
        let nbytes = n * stride;
        front.with_bytes_mut(|b| b[..nbytes].copy_from_slice(&self.data[pos..pos + nbytes]));
        outputs[0].produce(n);
        self.cursor.fetch_add(nbytes, Ordering::SeqCst);
        if self.posted_oob.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            for label in &self.labels {
                outputs[0].post_label(label.clone());
            }
            for message in &self.messages {
                outputs[0].post_message(message.clone());
            }
        }
    }
}

/// Accumulates every byte, label, and message consumed on its single input.
pub struct CollectorBlock {
    dtype: DType,
    collected: Mutex<Vec<u8>>,
    labels: Mutex<Vec<Label>>,
    messages: Mutex<Vec<Message>>,
}

impl CollectorBlock {
    /// An empty collector for elements of `dtype`.
    pub fn new(dtype: DType) -> Self {
        CollectorBlock { dtype, collected: Mutex::new(Vec::new()), labels: Mutex::new(Vec::new()), messages: Mutex::new(Vec::new()) }
    }

    /// Every byte consumed so far, in arrival order.
    pub fn collected(&self) -> Vec<u8> {
        self.collected.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every label observed so far, in arrival order.
    pub fn labels(&self) -> Vec<Label> {
        self.labels.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every message observed so far, in arrival order.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Block for CollectorBlock {
    fn name(&self) -> &str {
        "collector"
    }
    fn input_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn output_dtypes(&self) -> Vec<DType> {
        vec![]
    }
    fn work(&self, inputs: &[InputPort], _outputs: &[OutputPort]) {
        let n = inputs[0].elements();
        if n == 0 {
            return;
        }
        let Some(buf) = inputs[0].buffer() else { return };
        let stride = self.dtype.size().max(1);
        buf.with_bytes(|b| self.collected.lock().unwrap_or_else(|e| e.into_inner()).extend_from_slice(&b[..n * stride]));
        self.labels.lock().unwrap_or_else(|e| e.into_inner()).extend(inputs[0].labels());
        while let Some(message) = inputs[0].pop_message() {
            self.messages.lock().unwrap_or_else(|e| e.into_inner()).push(message);
        }
        inputs[0].consume(n);
    }
}

/// Inserts a fixed preamble (raw bytes, a whole number of `dtype`-sized
/// elements) at every label whose key matches `frame_start_key`, grounded on
/// `pothos-blocks/digital/FrameInsert.cpp::work()`: buffer segments are
/// sliced from the input and forwarded by reference (`post_buffer`, not the
/// output's own managed buffer) rather than copied into place, and the
/// frame-start label itself — along with every other pending label — is
/// re-posted with its index shifted by the cumulative preamble length
/// inserted ahead of it. Manages its own label placement, so it overrides
/// `propagate_labels` to a no-op rather than forwarding upstream labels
/// verbatim (mirroring `FrameInsert::propagateLabels`, which is also a
/// deliberate no-op for the same reason).
pub struct PreambleFramerBlock {
    dtype: DType,
    preamble: Vec<u8>,
    frame_start_key: String,
}

impl PreambleFramerBlock {
    /// A framer inserting `preamble` (raw bytes) ahead of every label whose
    /// key equals `"frameStart"`.
    pub fn new(dtype: DType, preamble: Vec<u8>) -> Self {
        PreambleFramerBlock::with_frame_start_key(dtype, preamble, "frameStart")
    }

    /// As [`Self::new`], but matching labels keyed `frame_start_key` instead
    /// of the default `"frameStart"`.
    pub fn with_frame_start_key(dtype: DType, preamble: Vec<u8>, frame_start_key: impl Into<String>) -> Self {
        PreambleFramerBlock { dtype, preamble, frame_start_key: frame_start_key.into() }
    }
}

impl Block for PreambleFramerBlock {
    fn name(&self) -> &str {
        "preamble_framer"
    }
    fn input_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn output_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn work(&self, inputs: &[InputPort], outputs: &[OutputPort]) {
        let n = inputs[0].elements();
        if n == 0 {
            return;
        }
        let Some(in_buf) = inputs[0].buffer() else { return };
        let stride = self.dtype.size().max(1);
        let preamble_elements = self.preamble.len() / stride;

        let mut labels = inputs[0].labels();
        labels.sort_by_key(|l| l.index);

        let mut consumed = 0usize;
        let mut label_index_offset = 0u64;
        let mut last_found_index: Option<u64> = None;

        for label in &labels {
            // Not yet visible in the current buffer; leave it pending.
            if label.index >= n as u64 {
                continue;
            }

            // Once we move past the run of labels sharing the last found
            // frame-start index, the offset grows for everything after it.
            if let Some(last) = last_found_index {
                if last != label.index {
                    last_found_index = None;
                    label_index_offset += preamble_elements as u64;
                }
            }

            if label.key == self.frame_start_key {
                let head_elements = (label.index as usize).saturating_sub(consumed);
                if head_elements != 0 {
                    if let Ok(head) = in_buf.slice(consumed, head_elements) {
                        outputs[0].post_buffer(head);
                    }
                    consumed += head_elements;
                }
                if preamble_elements != 0 {
                    let preamble_chunk = BufferChunk::alloc(self.dtype, preamble_elements);
                    preamble_chunk.with_bytes_mut(|b| b.copy_from_slice(&self.preamble));
                    outputs[0].post_buffer(preamble_chunk);
                }
                last_found_index = Some(label.index);
            }

            outputs[0].post_label(Label { index: label.index + label_index_offset, ..label.clone() });
        }

        let remaining = n - consumed;
        if remaining != 0 {
            if let Ok(tail) = in_buf.slice(consumed, remaining) {
                outputs[0].post_buffer(tail);
            }
        }

        inputs[0].consume(n);
    }

    fn propagate_labels(&self, _input_index: usize, _input: &InputPort, _outputs: &[OutputPort]) {}
}

/// A `float32` FIR filter with interpolation/decimation, grounded on the
/// original source's `comms/fir_filter` (taps convolved against a zero-stuffed,
/// upsampled-by-`interpolation` stream, then kept every `decimation`th sample).
/// Unlike a production filter this keeps no ring buffer of its own history
/// beyond the `taps.len() - 1` delay line the convolution itself needs, and
/// processes one call's input in a plain `Vec`; fine for scenario tests, not
/// tuned for throughput.
pub struct FirBlock {
    dtype: DType,
    taps: Vec<f32>,
    interpolation: u64,
    decimation: u64,
    delay: Mutex<VecDeque<f32>>,
    upsampled_count: AtomicU64,
}

impl FirBlock {
    /// A filter with `taps`, convolved at `interpolation`-times the input
    /// rate and decimated by `decimation` before emission.
    pub fn new(dtype: DType, taps: Vec<f32>, interpolation: u64, decimation: u64) -> Self {
        let k = taps.len().max(1);
        let mut delay = VecDeque::with_capacity(k);
        for _ in 0..k.saturating_sub(1) {
            delay.push_back(0.0);
        }
        FirBlock {
            dtype,
            taps,
            interpolation: interpolation.max(1),
            decimation: decimation.max(1),
            delay: Mutex::new(delay),
            upsampled_count: AtomicU64::new(0),
        }
    }
}

impl Block for FirBlock {
    fn name(&self) -> &str {
        "fir_filter"
    }
    fn input_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn output_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn resample_ratio(&self, _input_index: usize) -> (u64, u64) {
        (self.interpolation, self.decimation)
    }
    fn work(&self, inputs: &[InputPort], outputs: &[OutputPort]) {
        let n_in = inputs[0].elements();
        if n_in == 0 {
            return;
        }
        let in_buf = inputs[0].buffer().unwrap();
        let xs: Vec<f32> =
            in_buf.with_bytes(|b| b.chunks_exact(4).take(n_in).map(|c| f32::from_ne_bytes(c.try_into().unwrap())).collect());
        let max_out = outputs[0].elements();
        if max_out == 0 {
            return;
        }

        let mut delay = self.delay.lock().unwrap_or_else(|e| e.into_inner());
        let mut produced = Vec::new();
        let mut consumed_in = 0usize;
        for &x in &xs {
            for p in 0..self.interpolation {
                let u = if p == 0 { x } else { 0.0 };
                delay.push_back(u);
                if delay.len() > self.taps.len() {
                    delay.pop_front();
                }
                let global_index = self.upsampled_count.fetch_add(1, Ordering::SeqCst);
                if global_index % self.decimation == 0 {
                    let y: f32 = self.taps.iter().rev().zip(delay.iter().rev()).map(|(t, d)| t * d).sum();
                    produced.push(y);
                }
            }
            consumed_in += 1;
            if produced.len() >= max_out {
                break;
            }
        }
        drop(delay);

        let n_out = produced.len().min(max_out);
        if n_out > 0 {
            let dst = outputs[0].buffer().unwrap();
            dst.with_bytes_mut(|b| {
                for (i, v) in produced.iter().take(n_out).enumerate() {
                    b[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
                }
            });
            outputs[0].produce(n_out);
        }
        inputs[0].consume(consumed_in);
    }
}

/// The sending half of a cross-domain bridge: consumes its single input and
/// encodes it as wire frames (§6) for the paired [`NetworkSourceBlock`].
pub struct NetworkSinkBlock {
    dtype: DType,
    tx: crossbeam_channel::Sender<Vec<u8>>,
    next_index: AtomicU64,
}

/// The receiving half of a cross-domain bridge: decodes wire frames from the
/// paired [`NetworkSinkBlock`] and posts them on its single output.
pub struct NetworkSourceBlock {
    dtype: DType,
    rx: crossbeam_channel::Receiver<Vec<u8>>,
}

/// Builds a connected sink/source pair standing in for a cross-process
/// transport. Only `Tag::Buffer` frames are emitted; labels and messages
/// posted on the upstream side of a domain boundary do not currently
/// propagate through it.
pub fn network_bridge_pair(dtype: DType) -> (NetworkSinkBlock, NetworkSourceBlock) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (NetworkSinkBlock { dtype, tx, next_index: AtomicU64::new(0) }, NetworkSourceBlock { dtype, rx })
}

impl Block for NetworkSinkBlock {
    fn name(&self) -> &str {
        "network_sink"
    }
    fn input_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn output_dtypes(&self) -> Vec<DType> {
        vec![]
    }
    fn work(&self, inputs: &[InputPort], _outputs: &[OutputPort]) {
        let n = inputs[0].elements();
        if n == 0 {
            return;
        }
        let Some(buf) = inputs[0].buffer() else { return };
        let stride = self.dtype.size().max(1);
        let bytes = buf.with_bytes(|b| b[..n * stride].to_vec());
        let index = self.next_index.fetch_add(n as u64, Ordering::SeqCst);
        let _ = self.tx.send(wire::encode_frame(Tag::Buffer, index, &bytes));
        inputs[0].consume(n);
    }
}

impl Block for NetworkSourceBlock {
    fn name(&self) -> &str {
        "network_source"
    }
    fn input_dtypes(&self) -> Vec<DType> {
        vec![]
    }
    fn output_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn work(&self, _inputs: &[InputPort], outputs: &[OutputPort]) {
        let stride = self.dtype.size().max(1);
        while let Ok(frame) = self.rx.try_recv() {
            let Some((Tag::Buffer, _index, payload)) = wire::decode_frame(&frame) else { continue };
            let n = payload.len() / stride;
            if n == 0 {
                continue;
            }
            let chunk = BufferChunk::alloc(self.dtype, n);
            let nbytes = n * stride;
            chunk.with_bytes_mut(|b| b[..nbytes].copy_from_slice(&payload[..nbytes]));
            outputs[0].post_buffer(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dtype() -> DType {
        DType::from_alias("uint8", 1).unwrap()
    }

    #[test]
    fn feeder_emits_into_available_room() {
        let feeder = FeederBlock::new(dtype(), vec![1, 2, 3, 4]);
        let manager = flow_actors::GenericPool::new(dtype(), 1, 8);
        let output = OutputPort::new(dtype(), Box::new(manager));
        feeder.work(&[], std::slice::from_ref(&output));
        assert_eq!(output.total_elements(), 4);
    }

    #[test]
    fn collector_accumulates_bytes() {
        let collector = CollectorBlock::new(dtype());
        let input = InputPort::new(dtype());
        let chunk = BufferChunk::alloc(dtype(), 3);
        chunk.with_bytes_mut(|b| b.copy_from_slice(&[7, 8, 9]));
        input.deliver_chunk(chunk);
        collector.work(std::slice::from_ref(&input), &[]);
        assert_eq!(collector.collected(), vec![7, 8, 9]);
    }

    #[test]
    fn network_bridge_roundtrips_a_buffer() {
        let (sink, source) = network_bridge_pair(dtype());
        let input = InputPort::new(dtype());
        let chunk = BufferChunk::alloc(dtype(), 4);
        chunk.with_bytes_mut(|b| b.copy_from_slice(&[1, 2, 3, 4]));
        input.deliver_chunk(chunk);
        sink.work(std::slice::from_ref(&input), &[]);

        let manager = flow_actors::GenericPool::new(dtype(), 1, 8);
        let output = OutputPort::new(dtype(), Box::new(manager));
        let downstream = InputPort::new(dtype());
        output.subscribe(downstream.clone(), std::sync::Arc::new(|| {}));
        source.work(&[], std::slice::from_ref(&output));
        assert_eq!(downstream.elements(), 4);
    }

    #[test]
    fn fir_impulse_train_interpolates_by_two() {
        let dtype = DType::from_alias("float32", 1).unwrap();
        let fir = FirBlock::new(dtype, vec![1.0], 2, 1);
        let input = InputPort::new(dtype);
        let chunk = BufferChunk::alloc(dtype, 10);
        chunk.with_bytes_mut(|b| {
            for i in 0..10 {
                let v: f32 = if i == 0 { 1.0 } else { 0.0 };
                b[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
            }
        });
        input.deliver_chunk(chunk);

        let manager = flow_actors::GenericPool::new(dtype, 1, 64);
        let output = OutputPort::new(dtype, Box::new(manager));
        fir.work(std::slice::from_ref(&input), std::slice::from_ref(&output));

        assert_eq!(output.total_elements(), 20);
    }
}
