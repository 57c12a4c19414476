// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Edge-node-to-host integration tests.
//!
//! One in-memory broker per test, an [`EdgeNode`] on one side and a
//! [`HostApplication`] on the other, driven the way a deployment would
//! drive them: births live and retained, alias-only data, the sequence
//! wrap, clean and willed and stale deaths, rebirth requests, and
//! command routing.

use hspb::codec::encode;
use hspb::config::{HostConfig, NodeConfig};
use hspb::model::now_millis;
use hspb::transport::{Credentials, InMemoryBroker, InMemoryTransport, Transport};
use hspb::{
    DataType, Device, EdgeNode, EncodingScheme, EntityState, HostApplication, Metric, MetricValue,
    Payload, QoS,
};

fn birth_scope() -> Vec<Metric> {
    vec![
        Metric::new("Temp", DataType::Double, 21.5).expect("valid metric"),
        Metric::new("Running", DataType::Boolean, true).expect("valid metric"),
    ]
}

fn host_on(broker: &InMemoryBroker) -> HostApplication<InMemoryTransport> {
    let mut host = HostApplication::new(
        "scada01",
        HostConfig::default(),
        InMemoryTransport::new(broker),
    )
    .expect("valid host id");
    host.connect("inmem://broker", &Credentials::new("scada01"), &["FactoryA"])
        .expect("host connects");
    host
}

fn node_on(broker: &InMemoryBroker) -> EdgeNode<InMemoryTransport> {
    let mut node = EdgeNode::new(
        "FactoryA",
        "Line1",
        birth_scope(),
        NodeConfig::default(),
        InMemoryTransport::new(broker),
    )
    .expect("valid node");
    node.connect("inmem://broker", &Credentials::new("Line1"))
        .expect("node connects");
    node
}

// A client the engine does not drive, for forged wire traffic.
struct Rogue {
    transport: InMemoryTransport,
}

impl Rogue {
    fn connect(broker: &InMemoryBroker) -> Self {
        let mut transport = InMemoryTransport::new(broker);
        transport
            .connect("inmem://broker", &Credentials::new("rogue"), None)
            .expect("rogue connects");
        Self { transport }
    }

    fn publish(&mut self, topic: &str, payload: &Payload) {
        self.transport
            .publish(
                topic,
                &encode(payload, EncodingScheme::Binary),
                QoS::AtMostOnce,
                false,
            )
            .expect("rogue publish succeeds");
    }
}

#[test]
fn test_live_birth_then_data_mirrored() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let mut node = node_on(&broker);

    node.update(vec![
        Metric::new("Temp", DataType::Double, 22.0).expect("valid metric")
    ])
    .expect("update publishes");
    assert_eq!(host.pump().expect("pump"), 2, "NBIRTH plus one NDATA");

    let view = host.view();
    let snapshot = view.snapshot("FactoryA", "Line1").expect("mirror exists");
    assert!(snapshot.is_online());
    assert_eq!(snapshot.bd_seq(), Some(1), "first session births with bdSeq 1");
    assert!(!snapshot.birth_retained(), "the host heard this birth live");
    assert_eq!(
        view.metric("FactoryA", "Line1", "Temp").and_then(|m| m.value),
        Some(MetricValue::Double(22.0)),
        "alias-only NDATA resolved against the birth scope"
    );
    assert_eq!(
        view.metric("FactoryA", "Line1", "Running").and_then(|m| m.value),
        Some(MetricValue::Boolean(true)),
        "untouched metrics keep their birth values"
    );
}

#[test]
fn test_late_joining_host_reads_retained_birth() {
    let broker = InMemoryBroker::new();
    let mut node = node_on(&broker);
    let mut host = host_on(&broker);

    assert_eq!(
        host.pump().expect("pump"),
        1,
        "retained NBIRTH replays on subscribe"
    );
    let snapshot = host.view().snapshot("FactoryA", "Line1").expect("mirror exists");
    assert!(snapshot.is_online());
    assert!(snapshot.birth_retained(), "the mirror knows its birth was a replay");
    assert_eq!(
        host.view().metric("FactoryA", "Line1", "Temp").and_then(|m| m.value),
        Some(MetricValue::Double(21.5))
    );

    // The replayed birth still synchronizes the sequence run.
    node.update(vec![
        Metric::new("Temp", DataType::Double, 22.5).expect("valid metric")
    ])
    .expect("update publishes");
    assert_eq!(host.pump().expect("pump"), 1);
    assert_eq!(
        host.view().metric("FactoryA", "Line1", "Temp").and_then(|m| m.value),
        Some(MetricValue::Double(22.5))
    );
}

#[test]
fn test_data_missed_against_retained_birth_faults_then_recovers() {
    let broker = InMemoryBroker::new();
    let mut node = node_on(&broker);
    // Published while nobody listens: the run moves on to seq 1.
    node.update(vec![
        Metric::new("Temp", DataType::Double, 22.0).expect("valid metric")
    ])
    .expect("update publishes");

    let mut host = host_on(&broker);
    host.pump().expect("pump");

    // The next update lands as seq 2 against an expectation of 1.
    node.update(vec![
        Metric::new("Temp", DataType::Double, 23.0).expect("valid metric")
    ])
    .expect("update publishes");
    host.pump().expect("pump");
    assert_eq!(
        host.view().snapshot("FactoryA", "Line1").expect("mirror").state(),
        EntityState::Faulted,
        "gap against the retained birth faults the mirror"
    );

    // The auto-rebirth request is already queued on the node's NCMD.
    assert_eq!(node.pump_commands().expect("commands pumped"), 1);
    assert_eq!(node.bd_seq(), 2, "the answered rebirth advanced bdSeq");
    host.pump().expect("pump");
    let snapshot = host.view().snapshot("FactoryA", "Line1").expect("mirror");
    assert!(snapshot.is_online(), "a fresh birth recovers the mirror");
    assert_eq!(snapshot.bd_seq(), Some(2));
    assert_eq!(
        host.view().metric("FactoryA", "Line1", "Temp").and_then(|m| m.value),
        Some(MetricValue::Double(23.0)),
        "the rebirth carries the value the host missed"
    );
}

#[test]
fn test_sequence_wraps_through_255_without_fault() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let mut node = node_on(&broker);

    for i in 0..300 {
        node.update(vec![
            Metric::new("Temp", DataType::Double, f64::from(i)).expect("valid metric")
        ])
        .expect("update publishes");
    }
    assert_eq!(host.pump().expect("pump"), 301, "NBIRTH plus 300 NDATAs");

    let snapshot = host.view().snapshot("FactoryA", "Line1").expect("mirror");
    assert!(snapshot.is_online(), "the wrap at 255 -> 0 is not a gap");
    assert_eq!(snapshot.expected_seq(), 45, "300 steps past the birth, modulo 256");
    assert_eq!(
        host.view().metric("FactoryA", "Line1", "Temp").and_then(|m| m.value),
        Some(MetricValue::Double(299.0))
    );
}

#[test]
fn test_clean_offline_pairs_death_and_clears_mirror() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let mut node = node_on(&broker);
    host.pump().expect("pump");
    assert!(host.view().snapshot("FactoryA", "Line1").expect("mirror").is_online());

    node.offline().expect("clean shutdown");
    host.pump().expect("pump");

    let snapshot = host.view().snapshot("FactoryA", "Line1").expect("mirror");
    assert!(!snapshot.is_online(), "the paired NDEATH takes the mirror offline");
    assert!(
        host.view().metric("FactoryA", "Line1", "Temp").is_none(),
        "death invalidates the mirrored values"
    );
}

#[test]
fn test_abnormal_drop_fires_willed_death() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let node = node_on(&broker);
    host.pump().expect("pump");

    // No clean shutdown: the broker fires the NDEATH will registered
    // at connect, which still names the current bdSeq.
    drop(node);
    host.pump().expect("pump");
    assert!(
        !host.view().snapshot("FactoryA", "Line1").expect("mirror").is_online(),
        "the willed death takes the mirror offline"
    );
}

#[test]
fn test_stale_death_after_rebirth_is_ignored() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let mut node = node_on(&broker);
    host.pump().expect("pump");

    node.rebirth().expect("rebirth publishes");
    host.pump().expect("pump");
    assert_eq!(
        host.view().snapshot("FactoryA", "Line1").expect("mirror").bd_seq(),
        Some(2)
    );

    // The will registered at connect still says bdSeq 1; replaying it
    // must not kill the rebirthed session.
    let mut rogue = Rogue::connect(&broker);
    rogue.publish(
        "spBv1.0/FactoryA/NDEATH/Line1",
        &Payload::node_death(Some(now_millis()), 1),
    );
    host.pump().expect("pump");
    assert!(
        host.view().snapshot("FactoryA", "Line1").expect("mirror").is_online(),
        "a death naming a superseded bdSeq is stale"
    );

    rogue.publish(
        "spBv1.0/FactoryA/NDEATH/Line1",
        &Payload::node_death(Some(now_millis()), 2),
    );
    host.pump().expect("pump");
    assert!(
        !host.view().snapshot("FactoryA", "Line1").expect("mirror").is_online(),
        "a death naming the current bdSeq pairs with the rebirth"
    );
}

#[test]
fn test_rebirth_request_round_trip() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let mut node = node_on(&broker);
    host.pump().expect("pump");

    host.request_rebirth("FactoryA", "Line1").expect("request sent");
    assert_eq!(node.pump_commands().expect("commands pumped"), 1);
    assert_eq!(node.bd_seq(), 2);

    host.pump().expect("pump");
    assert_eq!(
        host.view().snapshot("FactoryA", "Line1").expect("mirror").bd_seq(),
        Some(2),
        "the commanded rebirth reached the mirror"
    );
}

#[test]
fn test_injected_gap_triggers_auto_rebirth() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let mut node = node_on(&broker);
    host.pump().expect("pump");

    // Forged traffic far ahead of the run.
    let mut rogue = Rogue::connect(&broker);
    let forged = Payload::data(
        Some(now_millis()),
        99,
        vec![Metric {
            name: None,
            alias: Some(1),
            datatype: DataType::Unknown,
            value: Some(MetricValue::Double(9000.0)),
            timestamp: None,
            is_historical: false,
            is_transient: false,
            properties: None,
            metadata: None,
        }],
    )
    .expect("valid payload");
    rogue.publish("spBv1.0/FactoryA/NDATA/Line1", &forged);
    host.pump().expect("pump");
    assert_eq!(
        host.view().snapshot("FactoryA", "Line1").expect("mirror").state(),
        EntityState::Faulted
    );

    // The node answers the host's rebirth request and the mirror
    // resynchronizes on the fresh birth.
    node.pump_commands().expect("commands pumped");
    host.pump().expect("pump");
    let snapshot = host.view().snapshot("FactoryA", "Line1").expect("mirror");
    assert!(snapshot.is_online());
    assert_eq!(
        host.view().metric("FactoryA", "Line1", "Temp").and_then(|m| m.value),
        Some(MetricValue::Double(21.5)),
        "resynchronized state reflects the node, not the forgery"
    );
}

#[test]
fn test_device_lifecycle_mirrored() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let mut node = node_on(&broker);

    node.register_device(
        Device::new(
            "pump",
            vec![Metric::new("Pressure", DataType::Float, 1.5f32).expect("valid metric")],
        )
        .expect("valid device"),
    )
    .expect("device registers");
    host.pump().expect("pump");

    let snapshot = host.view().snapshot("FactoryA", "Line1").expect("mirror");
    let device = snapshot.device("pump").expect("device mirror exists");
    assert!(device.is_online());
    assert_eq!(
        device.metrics().get("Pressure").and_then(|m| m.value.clone()),
        Some(MetricValue::Float(1.5))
    );

    node.update_device(
        "pump",
        vec![Metric::new("Pressure", DataType::Float, 2.5f32).expect("valid metric")],
    )
    .expect("DDATA publishes");
    host.pump().expect("pump");
    assert_eq!(
        host.view()
            .snapshot("FactoryA", "Line1")
            .expect("mirror")
            .device("pump")
            .expect("device mirror")
            .metrics()
            .get("Pressure")
            .and_then(|m| m.value.clone()),
        Some(MetricValue::Float(2.5)),
        "DDATA rides the node's sequence run into the device mirror"
    );

    node.deregister_device("pump").expect("device detaches");
    host.pump().expect("pump");
    let snapshot = host.view().snapshot("FactoryA", "Line1").expect("mirror");
    assert!(
        !snapshot.device("pump").expect("device mirror survives").is_online(),
        "DDEATH takes only the device offline"
    );
    assert!(snapshot.is_online(), "the node itself is untouched");
}

#[test]
fn test_commands_reach_the_node_hook() {
    let broker = InMemoryBroker::new();
    let mut host = host_on(&broker);
    let mut node = node_on(&broker);
    node.register_device(
        Device::new(
            "pump",
            vec![Metric::new("Valve", DataType::Boolean, false).expect("valid metric")],
        )
        .expect("valid device"),
    )
    .expect("device registers");

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = seen.clone();
    node.set_command_hook(Box::new(move |device, metric| {
        sink.borrow_mut().push((
            device.map(str::to_owned),
            metric.name.clone(),
            metric.value.clone(),
        ));
    }));

    host.send_node_command(
        "FactoryA",
        "Line1",
        vec![Metric::new("SetPoint", DataType::Double, 50.0).expect("valid metric")],
    )
    .expect("NCMD sent");
    host.send_device_command(
        "FactoryA",
        "Line1",
        "pump",
        vec![Metric::new("Valve", DataType::Boolean, true).expect("valid metric")],
    )
    .expect("DCMD sent");

    assert_eq!(node.pump_commands().expect("commands pumped"), 2);
    let seen = seen.borrow();
    assert_eq!(
        seen.as_slice(),
        &[
            (
                None,
                Some("SetPoint".to_string()),
                Some(MetricValue::Double(50.0))
            ),
            (
                Some("pump".to_string()),
                Some("Valve".to_string()),
                Some(MetricValue::Boolean(true))
            ),
        ],
        "node command first, device command second, each with its address"
    );
}

#[test]
fn test_json_deployment_end_to_end() {
    let broker = InMemoryBroker::new();
    let mut host = HostApplication::new(
        "scada01",
        HostConfig {
            encoding: EncodingScheme::Json,
            ..HostConfig::default()
        },
        InMemoryTransport::new(&broker),
    )
    .expect("valid host id");
    host.connect("inmem://broker", &Credentials::new("scada01"), &["FactoryA"])
        .expect("host connects");

    let mut node = EdgeNode::new(
        "FactoryA",
        "Line1",
        birth_scope(),
        NodeConfig {
            encoding: EncodingScheme::Json,
            ..NodeConfig::default()
        },
        InMemoryTransport::new(&broker),
    )
    .expect("valid node");
    node.connect("inmem://broker", &Credentials::new("Line1"))
        .expect("node connects");
    node.update(vec![
        Metric::new("Temp", DataType::Double, 22.0).expect("valid metric")
    ])
    .expect("update publishes");

    host.pump().expect("pump");
    assert_eq!(
        host.view().metric("FactoryA", "Line1", "Temp").and_then(|m| m.value),
        Some(MetricValue::Double(22.0))
    );

    // The retained birth really is structured text on the wire.
    let retained = broker
        .retained("spBv1.0/FactoryA/NBIRTH/Line1")
        .expect("birth retained");
    let doc: serde_json::Value = serde_json::from_slice(&retained).expect("wire bytes are JSON");
    assert_eq!(doc["seq"], 0);
    assert!(doc["metrics"].is_array());
}
