//! §8 scenario 5: back-pressure. One source feeding two sinks, one of which
//! never calls `consume()`. The slow sink's `InputPort` is given a small
//! capacity, so once its unconsumed backlog fills that capacity,
//! `OutputPort::is_ready()` (which requires *every* subscriber to have room
//! for the next production) stops being satisfied for the shared output —
//! stalling the source for the fast sink too, not just the slow one.

use flow::testing::CollectorBlock;
use flow::{Block, BufferManager, BufferMode, DType, InputPort, OutputPort, Topology};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Like `testing::FeederBlock`, but with a deliberately small custom output
/// pool so it exhausts well before its whole payload is fed, making the
/// back-pressure boundary observable within a short test.
struct SmallPoolFeeder {
    dtype: DType,
    data: Vec<u8>,
    cursor: AtomicUsize,
}

impl Block for SmallPoolFeeder {
    fn name(&self) -> &str {
        "small_pool_feeder"
    }
    fn input_dtypes(&self) -> Vec<DType> {
        vec![]
    }
    fn output_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn output_buffer_mode(&self, _port: usize, _domain: &str) -> BufferMode {
        BufferMode::Custom
    }
    fn output_buffer_manager(&self, _port: usize, _domain: &str) -> Option<Box<dyn BufferManager>> {
        Some(Box::new(flow_actors::GenericPool::new(self.dtype, 4, 4)))
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
    }
}

#[test]
fn slow_sink_stalls_the_source_for_every_subscriber() {
    let dtype = DType::from_alias("uint8", 1).unwrap();
    let data: Vec<u8> = (0..64u8).collect();
    let feeder = Arc::new(SmallPoolFeeder { dtype, data: data.clone(), cursor: AtomicUsize::new(0) });
    let fast = Arc::new(CollectorBlock::new(dtype));
    let slow = Arc::new(CollectorBlockThatNeverConsumes::new(dtype));

    let topology = Topology::new();
    let feeder_uid = topology.add_block(feeder, "default", "default");
    let fast_uid = topology.add_block(fast.clone(), "default", "default");
    let slow_uid = topology.add_block(slow.clone(), "default", "default");
    topology.connect(feeder_uid, 0, fast_uid, 0);
    topology.connect(feeder_uid, 0, slow_uid, 0);

    // Leaves room for exactly one production (the feeder's custom pool hands
    // out 4-element slabs) before the slow sink's backlog saturates it.
    topology.actor(slow_uid).unwrap().inputs()[0].set_capacity(4);

    topology.commit().unwrap();

    assert!(topology.wait_inactive(Duration::from_millis(50), Duration::from_secs(2)));

    let feeder_stats = topology.query_json_stats();
    let produced = feeder_stats[feeder_uid.to_string()]["outputStats"][0]["totalElements"].as_u64().unwrap();
    assert!(produced < data.len() as u64, "source should have stalled before feeding all {} bytes, produced {produced}", data.len());
    assert!(produced > 0, "source should have made some progress before stalling");

    // The fast sink only ever sees what the (stalled) shared output produced —
    // it stalls too, even though it could itself take more.
    assert_eq!(fast.collected().len() as u64, produced);
    assert_eq!(&fast.collected()[..], &data[..produced as usize]);
}

/// Never calls `consume()`, so its `InputPort`'s accumulated backlog only
/// grows — the scenario's stalled subscriber.
struct CollectorBlockThatNeverConsumes {
    dtype: DType,
    seen: std::sync::Mutex<usize>,
}

impl CollectorBlockThatNeverConsumes {
    fn new(dtype: DType) -> Self {
        CollectorBlockThatNeverConsumes { dtype, seen: std::sync::Mutex::new(0) }
    }
}

impl Block for CollectorBlockThatNeverConsumes {
    fn name(&self) -> &str {
        "stalled_sink"
    }
    fn input_dtypes(&self) -> Vec<DType> {
        vec![self.dtype]
    }
    fn output_dtypes(&self) -> Vec<DType> {
        vec![]
    }
    fn work(&self, inputs: &[InputPort], _outputs: &[OutputPort]) {
        *self.seen.lock().unwrap_or_else(|e| e.into_inner()) = inputs[0].elements();
    }
}
