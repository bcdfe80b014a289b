//! §8 scenario 3: preamble framer. Input `[a,b,c]` with a `frameStart` label
//! at index 1; output is `[a] ++ preamble ++ [b,c]`, and the `frameStart`
//! label shifts to the output index of the first preamble symbol.

use flow::testing::{CollectorBlock, FeederBlock, PreambleFramerBlock};
use flow::{DType, Label, Message, Topology};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn preamble_is_inserted_at_the_frame_start_label_and_shifts_it() {
    let dtype = DType::from_alias("uint8", 1).unwrap();
    let frame_start = Label::new(1, "frameStart", Message::Unit);
    let feeder = Arc::new(FeederBlock::with_oob(dtype, vec![b'a', b'b', b'c'], vec![frame_start], vec![]));
    let framer = Arc::new(PreambleFramerBlock::new(dtype, vec![0xAA, 0xBB]));
    let collector = Arc::new(CollectorBlock::new(dtype));

    let topology = Topology::new();
    let feeder_uid = topology.add_block(feeder, "default", "default");
    let framer_uid = topology.add_block(framer, "default", "default");
    let collector_uid = topology.add_block(collector.clone(), "default", "default");
    topology.connect(feeder_uid, 0, framer_uid, 0);
    topology.connect(framer_uid, 0, collector_uid, 0);
    topology.commit().unwrap();

    assert!(topology.wait_inactive(Duration::from_millis(30), Duration::from_secs(2)));

    assert_eq!(collector.collected(), vec![b'a', 0xAA, 0xBB, b'b', b'c']);
    let labels = collector.labels();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].key, "frameStart");
    assert_eq!(labels[0].index, 1, "frameStart should land at the first preamble symbol's position");
}

#[test]
fn labels_after_the_insertion_point_shift_by_the_preamble_length() {
    let dtype = DType::from_alias("uint8", 1).unwrap();
    let frame_start = Label::new(1, "frameStart", Message::Unit);
    let tail_marker = Label::new(2, "mark", Message::Unit);
    let feeder = Arc::new(FeederBlock::with_oob(
        dtype,
        vec![b'a', b'b', b'c'],
        vec![frame_start, tail_marker],
        vec![],
    ));
    let framer = Arc::new(PreambleFramerBlock::new(dtype, vec![0xAA, 0xBB]));
    let collector = Arc::new(CollectorBlock::new(dtype));

    let topology = Topology::new();
    let feeder_uid = topology.add_block(feeder, "default", "default");
    let framer_uid = topology.add_block(framer, "default", "default");
    let collector_uid = topology.add_block(collector.clone(), "default", "default");
    topology.connect(feeder_uid, 0, framer_uid, 0);
    topology.connect(framer_uid, 0, collector_uid, 0);
    topology.commit().unwrap();

    assert!(topology.wait_inactive(Duration::from_millis(30), Duration::from_secs(2)));

    assert_eq!(collector.collected(), vec![b'a', 0xAA, 0xBB, b'b', b'c']);
    let mut labels = collector.labels();
    labels.sort_by_key(|l| l.index);
    assert_eq!(labels.len(), 2);
    assert_eq!((labels[0].key.as_str(), labels[0].index), ("frameStart", 1));
    // Original input index 2 shifts by len(preamble) == 2.
    assert_eq!((labels[1].key.as_str(), labels[1].index), ("mark", 4));
}
