//! §8 scenario 1: feeder→collector with labels and messages.

use flow::testing::{CollectorBlock, FeederBlock};
use flow::{DType, Label, Message, Topology};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn feeder_to_collector_carries_buffers_labels_and_messages() {
    let dtype = DType::from_alias("uint8", 1).unwrap();
    let label = Label::new(2, "x", Message::Text("hello".to_string()));
    let feeder = Arc::new(FeederBlock::with_oob(dtype, vec![1, 2, 3, 4], vec![label], vec![Message::Text("m".to_string())]));
    let collector = Arc::new(CollectorBlock::new(dtype));

    let topology = Topology::new();
    let feeder_uid = topology.add_block(feeder.clone(), "default", "default");
    let collector_uid = topology.add_block(collector.clone(), "default", "default");
    topology.connect(feeder_uid, 0, collector_uid, 0);
    topology.commit().unwrap();

    assert!(topology.wait_inactive(Duration::from_millis(30), Duration::from_secs(2)));

    assert_eq!(collector.collected(), vec![1, 2, 3, 4]);
    let labels = collector.labels();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].index, 2);
    assert_eq!(labels[0].key, "x");
    assert!(matches!(&labels[0].value, Message::Text(s) if s == "hello"));

    let messages = collector.messages();
    assert_eq!(messages.len(), 1);
    assert!(matches!(&messages[0], Message::Text(s) if s == "m"));
}
